//! Control library for BJ_LED Bluetooth light strips

pub mod domain;
pub mod infrastructure;

pub use domain::effects::Effect;
pub use domain::models::{ColorMode, LightState, Rgb};
pub use infrastructure::bluetooth::{DeviceError, DeviceOptions, LedDevice};
