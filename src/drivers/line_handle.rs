//! Pins requested through the GPIO character device.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use gpio_cdev::{Chip, LineHandle, LineRequestFlags};
use log::info;

use crate::{
    drivers::software_pwm::{OutputPin, SoftwarePwm},
    pwm_driver::{BackendMode, PwmDriver},
    resolver::BackendCandidate,
};

pub const CONSUMER: &str = "fan-controld";

/// Exclusive output handle on one line of the primary GPIO chip.
///
/// The line offset is the board pin number. Releasing drops the handle,
/// which returns the line to the kernel.
#[derive(Debug)]
pub struct LineHandlePin {
    pin: u32,
    handle: Option<LineHandle>,
}

impl LineHandlePin {
    pub fn request(device: &Path, pin: u32) -> Result<Self> {
        let mut chip = Chip::new(device)
            .with_context(|| format!("Failed to open GPIO chip {}", device.display()))?;
        let handle = chip
            .get_line(pin)
            .and_then(|line| line.request(LineRequestFlags::OUTPUT, 0, CONSUMER))
            .with_context(|| format!("Failed to request GPIO line {pin} as output"))?;
        Ok(Self {
            pin,
            handle: Some(handle),
        })
    }
}

impl OutputPin for LineHandlePin {
    fn pin(&self) -> u32 {
        self.pin
    }

    fn set_level(&mut self, high: bool) -> Result<()> {
        self.handle
            .as_ref()
            .ok_or_else(|| anyhow!("GPIO line {} already released", self.pin))?
            .set_value(u8::from(high))
            .with_context(|| format!("Failed to set GPIO line {} value", self.pin))
    }

    fn release(&mut self) -> Result<()> {
        self.handle.take();
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct LineHandleCandidate {
    device: PathBuf,
    period: Duration,
}

impl LineHandleCandidate {
    pub fn new(device: impl Into<PathBuf>, period: Duration) -> Self {
        Self {
            device: device.into(),
            period,
        }
    }
}

#[async_trait]
impl BackendCandidate for LineHandleCandidate {
    fn name(&self) -> &'static str {
        "line-handle"
    }

    async fn probe(&self, pin: u32) -> Result<Box<dyn PwmDriver>> {
        let line = LineHandlePin::request(&self.device, pin)?;
        info!("Initialized GPIO {pin} using {}", self.device.display());
        Ok(Box::new(SoftwarePwm::new(
            line,
            BackendMode::SoftwarePwmLineHandle,
            self.period,
        )))
    }

    fn diagnose(&self) -> Option<String> {
        (!self.device.exists())
            .then(|| format!("GPIO character device {} not present", self.device.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_device_is_an_error() {
        let dir = tempdir().unwrap();
        let err = LineHandlePin::request(&dir.path().join("gpiochip0"), 12).unwrap_err();
        assert!(err.to_string().contains("Failed to open GPIO chip"));
    }

    #[test]
    fn regular_file_is_not_a_gpio_chip() {
        let dir = tempdir().unwrap();
        let device = dir.path().join("gpiochip0");
        std::fs::write(&device, "").unwrap();
        assert!(LineHandlePin::request(&device, 12).is_err());
    }

    #[tokio::test]
    async fn candidate_probe_fails_cleanly_without_device() {
        let dir = tempdir().unwrap();
        let candidate =
            LineHandleCandidate::new(dir.path().join("gpiochip0"), Duration::from_millis(10));

        assert!(candidate.probe(12).await.is_err());
        assert!(candidate.check_available(12).await.is_err());
        assert!(candidate.diagnose().unwrap().contains("not present"));
    }
}
