use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use crate::hysteresis::IndicatorFrame;

const ENABLE_LOGS: bool = true;

use crate::log_warn;

pub const FULL: u8 = 100;
pub const OFF: u8 = 0;

pub const DEFAULT_LED_ROOT: &str = "/sys/class/leds";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Active,
    Inactive,
}

/// Blink phase for a dwell counter: lit on odd ticks, dark on even ones.
pub fn blink_intensity(count: u32) -> u8 {
    if count % 2 == 1 {
        FULL
    } else {
        OFF
    }
}

/// Status lights. Intensity is a percentage, 0..=100.
pub trait IndicatorOutput: Send {
    fn set_intensity(&mut self, channel: Channel, value: u8) -> Result<()>;

    /// Called once when the monitor shuts down.
    fn release(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<I: IndicatorOutput + ?Sized> IndicatorOutput for Box<I> {
    fn set_intensity(&mut self, channel: Channel, value: u8) -> Result<()> {
        (**self).set_intensity(channel, value)
    }

    fn release(&mut self) -> Result<()> {
        (**self).release()
    }
}

/// Writes a tick's frame, logging rather than failing on a bad write.
pub fn apply_frame<I: IndicatorOutput + ?Sized>(indicator: &mut I, frame: IndicatorFrame) {
    let writes = [
        (Channel::Active, frame.active),
        (Channel::Inactive, frame.inactive),
    ];
    for (channel, value) in writes {
        if let Some(value) = value {
            if let Err(err) = indicator.set_intensity(channel, value) {
                log_warn!("failed to set {channel:?} indicator to {value}: {err:?}");
            }
        }
    }
}

/// For headless installs with no lights wired up.
#[derive(Debug, Default)]
pub struct NoIndicator;

impl IndicatorOutput for NoIndicator {
    fn set_intensity(&mut self, _channel: Channel, _value: u8) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug)]
struct Led {
    brightness: PathBuf,
    max_brightness: u32,
}

impl Led {
    fn open(root: &Path, name: &str) -> Result<Self> {
        let dir = root.join(name);
        let max_path = dir.join("max_brightness");
        let raw = fs::read_to_string(&max_path)
            .with_context(|| format!("Failed to read {}", max_path.display()))?;
        let max_brightness: u32 = raw
            .trim()
            .parse()
            .with_context(|| format!("invalid max_brightness '{}' for LED {name}", raw.trim()))?;
        if max_brightness == 0 {
            bail!("LED {name} reports max_brightness of 0");
        }

        Ok(Self {
            brightness: dir.join("brightness"),
            max_brightness,
        })
    }

    fn write_percent(&self, value: u8) -> Result<()> {
        let percent = u32::from(value.min(FULL));
        let level = (percent * self.max_brightness + 50) / 100;
        fs::write(&self.brightness, level.to_string())
            .with_context(|| format!("Failed to write {}", self.brightness.display()))
    }
}

/// Two LEDs driven through the Linux LED class (`/sys/class/leds/<name>`).
#[derive(Debug)]
pub struct SysfsLeds {
    active: Led,
    inactive: Led,
}

impl SysfsLeds {
    pub fn open(root: &Path, active: &str, inactive: &str) -> Result<Self> {
        Ok(Self {
            active: Led::open(root, active)?,
            inactive: Led::open(root, inactive)?,
        })
    }

    fn led(&self, channel: Channel) -> &Led {
        match channel {
            Channel::Active => &self.active,
            Channel::Inactive => &self.inactive,
        }
    }
}

impl IndicatorOutput for SysfsLeds {
    fn set_intensity(&mut self, channel: Channel, value: u8) -> Result<()> {
        self.led(channel).write_percent(value)
    }

    fn release(&mut self) -> Result<()> {
        self.active.write_percent(OFF)?;
        self.inactive.write_percent(OFF)
    }
}
