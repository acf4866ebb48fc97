pub mod callbacks;
pub mod config;
pub mod controller;
pub mod hysteresis;
pub mod indicator;
pub mod meter;
pub mod notify;
pub mod sampler;
pub mod source;
mod utils;

pub use callbacks::TransitionCallbacks;
pub use config::{ConfigError, FileConfig, MonitorConfig};
pub use controller::{MonitorController, MonitorSnapshot};
pub use hysteresis::{HysteresisState, Mode, Transition};
pub use indicator::{Channel, IndicatorOutput, NoIndicator, SysfsLeds};
pub use meter::ActivityMeter;
pub use notify::Notifier;
pub use sampler::{SampleSource, SensitivityThreshold, SensorSample};
