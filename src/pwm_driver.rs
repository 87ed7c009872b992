//! PWM driver abstraction shared by every hardware backend.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Mechanism used to produce the PWM signal for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendMode {
    HardwarePwm,
    SoftwarePwmLineHandle,
    SoftwarePwmLegacyGpio,
    Unavailable,
}

impl BackendMode {
    /// Label published in the status document.
    pub const fn label(self) -> &'static str {
        match self {
            BackendMode::HardwarePwm => "hardware",
            BackendMode::SoftwarePwmLineHandle | BackendMode::SoftwarePwmLegacyGpio => "software",
            BackendMode::Unavailable => "unknown",
        }
    }
}

/// PWM period for the given frequency.
pub fn period_for_frequency(frequency_hz: u32) -> Duration {
    Duration::from_nanos(1_000_000_000 / u64::from(frequency_hz.max(1)))
}

/// Duty register value for `percent` of `period_ns`, rounded half up.
///
/// Percentages above 100 are clamped, so the result never exceeds the period.
pub fn duty_ns(period_ns: u64, percent: u8) -> u64 {
    (period_ns * u64::from(percent.min(100)) + 50) / 100
}

/// Bound PWM output on a single pin.
///
/// Hardware drivers return from [`set_duty_cycle`](PwmDriver::set_duty_cycle)
/// immediately and leave waiting to the caller. Software drivers generate the
/// waveform themselves and only return once `interval` has elapsed or
/// `cancel` fired, which [`holds_interval`](PwmDriver::holds_interval) reports.
#[async_trait]
pub trait PwmDriver: Send + Sync + core::fmt::Debug {
    fn mode(&self) -> BackendMode;

    /// Logical (board numbered) pin driven by this backend.
    fn pin(&self) -> u32;

    fn holds_interval(&self) -> bool;

    async fn set_duty_cycle(
        &mut self,
        percent: u8,
        interval: Duration,
        cancel: &CancellationToken,
    ) -> Result<()>;

    /// De-asserts the output and releases every exported resource.
    async fn shutdown(&mut self) -> Result<()>;
}
