use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};

use crate::sampler::{SampleSource, SensorSample};

pub const DEFAULT_IIO_DEVICE: &str = "/sys/bus/iio/devices/iio:device0";

/// m/s² per g.
const STANDARD_GRAVITY: f64 = 9.80665;

/// Accelerometer exposed through the Linux Industrial I/O subsystem, e.g. a
/// LIS3DH bound to the `st_accel` driver.
///
/// Raw counts are multiplied by `in_accel_scale` (m/s² per count) and
/// reported in g.
#[derive(Debug)]
pub struct IioAccelerometer {
    axes: [PathBuf; 3],
    scale: f64,
}

impl IioAccelerometer {
    pub fn open(device_dir: &Path) -> Result<Self> {
        let scale_path = device_dir.join("in_accel_scale");
        let scale = read_number(&scale_path)?;

        let axes = ["x", "y", "z"].map(|axis| device_dir.join(format!("in_accel_{axis}_raw")));
        for path in &axes {
            if !path.exists() {
                bail!("accelerometer channel {} not found", path.display());
            }
        }

        Ok(Self { axes, scale })
    }

    fn read_axis(&self, index: usize) -> Result<f64> {
        let raw = read_number(&self.axes[index])?;
        Ok(raw * self.scale / STANDARD_GRAVITY)
    }
}

impl SampleSource for IioAccelerometer {
    fn read(&mut self) -> Result<SensorSample> {
        Ok(SensorSample::new(
            self.read_axis(0)?,
            self.read_axis(1)?,
            self.read_axis(2)?,
        ))
    }
}

fn read_number(path: &Path) -> Result<f64> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    contents
        .trim()
        .parse()
        .with_context(|| format!("invalid value '{}' in {}", contents.trim(), path.display()))
}
