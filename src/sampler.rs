use std::{sync::Arc, thread};

use anyhow::{Context, Result};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::{config::MARK_PAUSE, meter::ActivityMeter};

const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info};

/// One accelerometer reading, per axis, in units of standard gravity.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct SensorSample {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl SensorSample {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// Anything that can hand out accelerometer readings on demand.
///
/// `read` may block. An error is fatal to the sampler.
pub trait SampleSource: Send {
    fn read(&mut self) -> Result<SensorSample>;
}

impl<S: SampleSource + ?Sized> SampleSource for Box<S> {
    fn read(&mut self) -> Result<SensorSample> {
        (**self).read()
    }
}

/// Magnitude an axis has to exceed to count as movement: 1g plus sensitivity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensitivityThreshold(f64);

impl SensitivityThreshold {
    pub fn from_sensitivity(sensitivity: f64) -> Self {
        Self(1.0 + sensitivity)
    }

    pub fn value(self) -> f64 {
        self.0
    }

    pub fn is_exceeded_by(self, sample: &SensorSample) -> bool {
        [sample.x, sample.y, sample.z]
            .iter()
            .any(|axis| axis.abs() > self.0)
    }
}

/// Polls `source` until `cancel_token` fires, marking `meter` on every
/// reading where an axis leaves the rest band.
///
/// A failed read cancels `cancel_token` so the rest of the monitor winds
/// down with it, and the error is returned.
pub fn sampling_loop<S: SampleSource>(
    mut source: S,
    meter: Arc<ActivityMeter>,
    threshold: SensitivityThreshold,
    cancel_token: CancellationToken,
) -> Result<()> {
    log_info!(
        "vibration sampler started (movement threshold {:.3}g)",
        threshold.value()
    );

    while !cancel_token.is_cancelled() {
        let sample = match source.read().context("sensor read failed") {
            Ok(sample) => sample,
            Err(err) => {
                log_error!("vibration sampler stopping: {err:?}");
                cancel_token.cancel();
                return Err(err);
            }
        };

        if threshold.is_exceeded_by(&sample) {
            meter.mark();
            thread::sleep(MARK_PAUSE);
        }
    }

    log_info!("vibration sampler shutting down");
    Ok(())
}
