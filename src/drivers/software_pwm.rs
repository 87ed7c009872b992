//! CPU-timed PWM over any output pin primitive.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use log::{debug, warn};
use tokio::time::{Instant, sleep, sleep_until};
use tokio_util::sync::CancellationToken;

use crate::pwm_driver::{BackendMode, PwmDriver};

/// Single GPIO line configured as output.
#[cfg_attr(test, mockall::automock)]
pub trait OutputPin: Send + Sync {
    /// Logical (board numbered) pin.
    fn pin(&self) -> u32;

    fn set_level(&mut self, high: bool) -> Result<()>;

    /// Gives the line back to the kernel. Further level changes fail.
    fn release(&mut self) -> Result<()>;
}

/// Shortest period the runtime timer can produce with usable duty resolution.
pub const MIN_SOFTWARE_PERIOD: Duration = Duration::from_millis(2);

/// Software PWM driver generating a fixed-frequency square wave.
///
/// 0% and 100% drive a constant level once and hold it, everything in
/// between toggles the pin once per period until the interval elapses.
/// Edges are scheduled against absolute deadlines, so timer rounding moves
/// single edges but never accumulates into the frequency or duty.
pub struct SoftwarePwm<P> {
    pin: P,
    mode: BackendMode,
    period: Duration,
}

impl<P: OutputPin> SoftwarePwm<P> {
    pub fn new(pin: P, mode: BackendMode, period: Duration) -> Self {
        let period = if period < MIN_SOFTWARE_PERIOD {
            warn!(
                "PWM period {period:?} too short for software timing on GPIO {}, using {:?}",
                pin.pin(),
                MIN_SOFTWARE_PERIOD
            );
            MIN_SOFTWARE_PERIOD
        } else {
            period
        };
        Self { pin, mode, period }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    async fn hold_level(
        &mut self,
        high: bool,
        interval: Duration,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.pin.set_level(high)?;
        tokio::select! {
            () = cancel.cancelled() => {
                debug!("Constant level hold on GPIO {} cancelled", self.pin.pin());
            }
            () = sleep(interval) => {}
        }
        Ok(())
    }

    async fn generate(
        &mut self,
        percent: u8,
        interval: Duration,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let on_time = self.period.mul_f64(f64::from(percent) / 100.0);
        let start = Instant::now();
        let deadline = start + interval;
        let mut edge = start;

        while edge < deadline && !cancel.is_cancelled() {
            self.pin.set_level(true)?;
            sleep_until(edge + on_time).await;
            self.pin.set_level(false)?;
            edge += self.period;
            sleep_until(edge).await;
        }
        Ok(())
    }
}

impl<P> core::fmt::Debug for SoftwarePwm<P> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SoftwarePwm")
            .field("mode", &self.mode)
            .field("period", &self.period)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<P: OutputPin> PwmDriver for SoftwarePwm<P> {
    fn mode(&self) -> BackendMode {
        self.mode
    }

    fn pin(&self) -> u32 {
        self.pin.pin()
    }

    fn holds_interval(&self) -> bool {
        true
    }

    async fn set_duty_cycle(
        &mut self,
        percent: u8,
        interval: Duration,
        cancel: &CancellationToken,
    ) -> Result<()> {
        match percent.min(100) {
            0 => self.hold_level(false, interval, cancel).await,
            100 => self.hold_level(true, interval, cancel).await,
            percent => self.generate(percent, interval, cancel).await,
        }
    }

    async fn shutdown(&mut self) -> Result<()> {
        let lowered = self.pin.set_level(false);
        self.pin.release()?;
        lowered
    }
}
