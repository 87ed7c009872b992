//! Backends able to put a PWM signal on a fan pin.

pub mod chip_base;
pub mod hardware_pwm;
pub mod legacy_gpio;
pub mod line_handle;
pub mod software_pwm;
pub mod sysfs;
