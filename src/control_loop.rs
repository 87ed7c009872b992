//! Temperature driven duty cycle loop over the resolved PWM backend.
//!
//! Each iteration refreshes the manual override, samples the SoC
//! temperature, publishes the status document and hands the chosen duty
//! cycle to the backend. Iteration failures are reported in the status
//! document and retried after [`ERROR_BACKOFF`]; only cancellation ends the
//! loop, after which the backend is torn down and a final status published.

use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::{
    overrides::{OverrideReader, Overrides},
    pwm_driver::{BackendMode, PwmDriver},
    sensors::TemperatureSensor,
    status::{Status, StatusPublisher, epoch_seconds, round_temperature},
};

/// Pause after a failed iteration.
pub const ERROR_BACKOFF: Duration = Duration::from_secs(30);

/// Hold interval while manual mode is on.
pub const MANUAL_INTERVAL: Duration = Duration::from_secs(5);

const INITIALIZING: &str = "Initializing...";
const SENSOR_FAILURE: &str = "Temperature read failed";
const STOPPED: &str = "Service stopped";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Initializing,
    Running,
    /// The last iteration failed; retrying after a backoff.
    Degraded,
    ShuttingDown,
    Stopped,
}

/// Duty cycle to apply and how long to hold it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub duty_cycle: u8,
    pub interval: Duration,
}

/// Picks the duty cycle for a temperature in degrees Celsius.
///
/// Hotter bands hold longer to damp oscillation. Each band includes its lower
/// bound. Manual mode wins regardless of temperature.
pub fn decide(temperature: f64, overrides: &Overrides) -> Decision {
    if overrides.manual_mode {
        return Decision {
            duty_cycle: overrides.manual_duty_cycle.min(100),
            interval: MANUAL_INTERVAL,
        };
    }

    let (duty_cycle, secs) = if temperature >= 50.0 {
        (100, 180)
    } else if temperature >= 40.0 {
        (85, 120)
    } else {
        (60, 60)
    };

    Decision {
        duty_cycle,
        interval: Duration::from_secs(secs),
    }
}

/// Everything the loop knows, mutated once per iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlState {
    pub temperature: Option<f64>,
    pub duty_cycle: u8,
    pub mode: BackendMode,
    pub pin: u32,
    pub overrides: Overrides,
    pub last_update: SystemTime,
    pub last_error: Option<String>,
    pub phase: LoopState,
}

impl ControlState {
    fn new(mode: BackendMode, pin: u32) -> Self {
        Self {
            temperature: None,
            duty_cycle: 0,
            mode,
            pin,
            overrides: Overrides::default(),
            last_update: SystemTime::now(),
            last_error: None,
            phase: LoopState::Initializing,
        }
    }

    pub fn status(&self) -> Status {
        Status {
            temperature: self.temperature.map(round_temperature),
            duty_cycle: self.duty_cycle,
            pwm_mode: self.mode.label().to_string(),
            gpio_pin: self.pin,
            manual_mode: self.overrides.manual_mode,
            manual_duty_cycle: self
                .overrides
                .manual_mode
                .then_some(self.overrides.manual_duty_cycle),
            last_update: epoch_seconds(self.last_update),
            error: self.last_error.clone(),
        }
    }
}

pub struct ControlLoop {
    driver: Box<dyn PwmDriver>,
    sensor: Box<dyn TemperatureSensor>,
    overrides: OverrideReader,
    status: StatusPublisher,
    state: ControlState,
}

impl ControlLoop {
    pub fn new(
        driver: Box<dyn PwmDriver>,
        sensor: Box<dyn TemperatureSensor>,
        overrides: OverrideReader,
        status: StatusPublisher,
    ) -> Self {
        let state = ControlState::new(driver.mode(), driver.pin());
        Self {
            driver,
            sensor,
            overrides,
            status,
            state,
        }
    }

    pub fn state(&self) -> &ControlState {
        &self.state
    }

    /// Runs until `cancel` fires, then releases the backend.
    ///
    /// Returns the final state; an error means the backend could not be
    /// released cleanly.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<ControlState> {
        info!(
            "Fan control started on GPIO {} ({} PWM, sensor {})",
            self.state.pin,
            self.state.mode.label(),
            self.sensor.key()
        );

        self.state.last_error = Some(INITIALIZING.to_string());
        self.publish().await;

        while !cancel.is_cancelled() {
            let wait = self.run_iteration(&cancel).await;
            tokio::select! {
                () = cancel.cancelled() => break,
                () = sleep(wait) => {}
            }
        }

        self.teardown().await
    }

    /// Executes one control step and returns how long to wait before the next.
    pub async fn run_iteration(&mut self, cancel: &CancellationToken) -> Duration {
        self.state.overrides = self.overrides.refresh(self.state.overrides).await;

        let temperature = match self.sensor.read_temperature().await {
            Ok(temperature) => temperature,
            Err(e) => {
                warn!("{SENSOR_FAILURE}: {e:#}");
                self.state.temperature = None;
                return self.degrade(SENSOR_FAILURE.to_string()).await;
            }
        };

        let decision = decide(temperature, &self.state.overrides);
        if decision.duty_cycle != self.state.duty_cycle {
            info!(
                "Temperature {:.1}°C, duty cycle {}% -> {}% (hold {:?}{})",
                temperature,
                self.state.duty_cycle,
                decision.duty_cycle,
                decision.interval,
                if self.state.overrides.manual_mode { ", manual" } else { "" }
            );
        } else {
            debug!("Temperature {temperature:.1}°C, duty cycle {}%", decision.duty_cycle);
        }

        self.state.temperature = Some(temperature);
        self.state.duty_cycle = decision.duty_cycle;
        self.state.last_error = None;
        self.state.phase = LoopState::Running;
        self.publish().await;

        if let Err(e) = self
            .driver
            .set_duty_cycle(decision.duty_cycle, decision.interval, cancel)
            .await
        {
            error!("Failed to apply duty cycle {}%: {e:#}", decision.duty_cycle);
            return self.degrade(format!("{e:#}")).await;
        }

        if self.driver.holds_interval() {
            Duration::ZERO
        } else {
            decision.interval
        }
    }

    async fn degrade(&mut self, reason: String) -> Duration {
        self.state.phase = LoopState::Degraded;
        self.state.last_error = Some(reason);
        self.publish().await;
        ERROR_BACKOFF
    }

    async fn teardown(mut self) -> Result<ControlState> {
        self.state.phase = LoopState::ShuttingDown;
        info!("Stopping fan control on GPIO {}", self.state.pin);

        let released = self.driver.shutdown().await;
        if let Err(e) = &released {
            error!("Failed to release PWM backend: {e:#}");
        }

        self.state.duty_cycle = 0;
        self.state.last_error = Some(STOPPED.to_string());
        self.publish().await;
        self.state.phase = LoopState::Stopped;

        released.context("PWM backend was not released cleanly")?;
        info!("Fan control stopped");
        Ok(self.state)
    }

    async fn publish(&mut self) {
        self.state.last_update = SystemTime::now();
        if let Err(e) = self.status.publish(&self.state.status()).await {
            warn!("Failed to publish status: {e:#}");
        }
    }
}
