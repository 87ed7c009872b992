//! Startup discovery of the PWM mechanism for the configured pin.
//!
//! Backends are tried in a fixed priority order, each one an independent
//! [`BackendCandidate`]. When the configured pin is unusable with every
//! candidate, a list of generally safe alternate pins is scanned and the
//! first available one is bound instead.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use log::{debug, error, info, warn};
use thiserror::Error;

use crate::{
    config::Config,
    drivers::{
        hardware_pwm::HardwarePwmCandidate, legacy_gpio::LegacyGpioCandidate,
        line_handle::LineHandleCandidate,
    },
    pwm_driver::PwmDriver,
};

/// One way of producing PWM on a pin.
///
/// A failed [`probe`](BackendCandidate::probe) must leave nothing exported
/// or enabled behind.
#[async_trait]
pub trait BackendCandidate: Send + Sync + core::fmt::Debug {
    fn name(&self) -> &'static str;

    fn qualifies(&self, _pin: u32) -> bool {
        true
    }

    async fn probe(&self, pin: u32) -> Result<Box<dyn PwmDriver>>;

    /// Probes the pin and releases it again straight away.
    async fn check_available(&self, pin: u32) -> Result<()> {
        let mut driver = self.probe(pin).await?;
        driver.shutdown().await
    }

    /// Explains why this mechanism cannot work on the running system, if it
    /// can tell.
    fn diagnose(&self) -> Option<String> {
        None
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeFailure {
    pub candidate: &'static str,
    pub pin: u32,
    pub reason: String,
}

/// Every candidate failed on the configured pin and on all fallback pins.
#[derive(Debug, Error)]
#[error("no PWM backend usable for GPIO {pin} ({} probe attempts failed)", .attempts.len())]
pub struct ResolutionError {
    pub pin: u32,
    pub attempts: Vec<ProbeFailure>,
    pub hints: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct BackendResolver {
    candidates: Vec<Arc<dyn BackendCandidate>>,
    fallback_pins: Vec<u32>,
}

impl BackendResolver {
    pub fn new(candidates: Vec<Arc<dyn BackendCandidate>>, fallback_pins: Vec<u32>) -> Self {
        Self {
            candidates,
            fallback_pins,
        }
    }

    /// Hardware PWM, then line handle, then legacy numbering.
    pub fn from_config(config: &Config) -> Self {
        let period = config.pwm_period();
        Self::new(
            vec![
                Arc::new(HardwarePwmCandidate::new(
                    &config.pwm_sysfs,
                    config.hardware_pwm.clone(),
                    period,
                )),
                Arc::new(LineHandleCandidate::new(&config.gpio_chip_device, period)),
                Arc::new(LegacyGpioCandidate::new(
                    &config.gpio_sysfs,
                    config.legacy_gpio_base.strategy(),
                    period,
                )),
            ],
            config.fallback_pins.clone(),
        )
    }

    pub fn candidate_names(&self) -> Vec<&'static str> {
        self.candidates.iter().map(|c| c.name()).collect()
    }

    pub async fn resolve(&self, pin: u32) -> Result<Box<dyn PwmDriver>, ResolutionError> {
        info!("Resolving PWM backend for GPIO {pin}...");
        let mut attempts = Vec::new();

        if let Some(driver) = self.bind(pin, &mut attempts).await {
            return Ok(driver);
        }

        warn!("GPIO {pin} unusable, scanning alternate pins {:?}", self.fallback_pins);
        for alternate in self.scan_fallback_pins(pin, &mut attempts).await {
            warn!("Switching to GPIO {alternate} which is available");
            if let Some(driver) = self.bind(alternate, &mut attempts).await {
                return Ok(driver);
            }
        }

        Err(ResolutionError {
            pin,
            attempts,
            hints: self.candidates.iter().filter_map(|c| c.diagnose()).collect(),
        })
    }

    async fn bind(&self, pin: u32, attempts: &mut Vec<ProbeFailure>) -> Option<Box<dyn PwmDriver>> {
        for candidate in self.candidates.iter().filter(|c| c.qualifies(pin)) {
            debug!("Probing {} on GPIO {pin}", candidate.name());
            match candidate.probe(pin).await {
                Ok(driver) => {
                    info!(
                        "Using {} for GPIO {pin} ({} PWM)",
                        candidate.name(),
                        driver.mode().label()
                    );
                    return Some(driver);
                }
                Err(e) => {
                    warn!("{} failed on GPIO {pin}: {e:#}", candidate.name());
                    attempts.push(ProbeFailure {
                        candidate: candidate.name(),
                        pin,
                        reason: format!("{e:#}"),
                    });
                }
            }
        }
        None
    }

    async fn scan_fallback_pins(&self, pin: u32, attempts: &mut Vec<ProbeFailure>) -> Vec<u32> {
        let mut available = Vec::new();
        for &alternate in self.fallback_pins.iter().filter(|&&p| p != pin) {
            for candidate in self.candidates.iter().filter(|c| c.qualifies(alternate)) {
                match candidate.check_available(alternate).await {
                    Ok(()) => {
                        info!("GPIO {alternate} is available via {}", candidate.name());
                        available.push(alternate);
                        break;
                    }
                    Err(e) => attempts.push(ProbeFailure {
                        candidate: candidate.name(),
                        pin: alternate,
                        reason: format!("{e:#}"),
                    }),
                }
            }
        }

        if available.is_empty() {
            warn!("No available GPIO pins found among alternates");
        } else {
            info!("Found {} available GPIO pin(s): {available:?}", available.len());
        }
        available
    }
}

impl ResolutionError {
    /// Logs every failed attempt and what to check next.
    pub fn log_diagnostics(&self) {
        error!("FAILED TO INITIALIZE GPIO {}", self.pin);
        for attempt in &self.attempts {
            error!("  {} on GPIO {}: {}", attempt.candidate, attempt.pin, attempt.reason);
        }
        for hint in &self.hints {
            error!("  {hint}");
        }
        error!("Check whether another service holds GPIO {}", self.pin);
        error!("Inspect /sys/kernel/debug/gpio or run gpioinfo for line ownership");
    }
}
