use std::{fs, path::Path, thread, time::Duration};

use anyhow::{bail, Context, Result};

use crate::sampler::{SampleSource, SensorSample};

/// Plays back a fixed list of samples forever, one per `pace`.
///
/// Useful for bench-testing the monitor without a sensor attached.
#[derive(Debug, Clone)]
pub struct ReplaySource {
    samples: Vec<SensorSample>,
    cursor: usize,
    pace: Duration,
}

impl ReplaySource {
    pub fn new(samples: Vec<SensorSample>, pace: Duration) -> Result<Self> {
        if samples.is_empty() {
            bail!("replay needs at least one sample");
        }
        Ok(Self {
            samples,
            cursor: 0,
            pace,
        })
    }

    /// Loads a JSON array of `{ "x": .., "y": .., "z": .. }` objects.
    pub fn from_json_file(path: &Path, pace: Duration) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read replay file {}", path.display()))?;
        let samples: Vec<SensorSample> = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse replay file {}", path.display()))?;
        Self::new(samples, pace)
    }
}

impl SampleSource for ReplaySource {
    fn read(&mut self) -> Result<SensorSample> {
        if !self.pace.is_zero() {
            thread::sleep(self.pace);
        }
        let sample = self.samples[self.cursor];
        self.cursor = (self.cursor + 1) % self.samples.len();
        Ok(sample)
    }
}
