pub mod iio;
pub mod replay;

pub use iio::IioAccelerometer;
pub use replay::ReplaySource;
