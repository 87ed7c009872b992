//! System coordinator for backend resolution, the control task and signals.

use anyhow::{Context, Result, bail};
use log::{error, info};
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;

use crate::{
    config::Config,
    control_loop::ControlLoop,
    overrides::OverrideReader,
    pwm_driver::PwmDriver,
    resolver::BackendResolver,
    status::StatusPublisher,
    task_manager::TaskManager,
    temperature_sensors::thermal_zone::ThermalZoneSensor,
};

const CONTROL_TASK: &str = "ControlLoop";

/// Manages the daemon lifecycle: resolve the backend once, run the control
/// loop as a task, stop everything on SIGINT or SIGTERM.
pub struct SystemCoordinator {
    task_manager: TaskManager,
    config: Config,
    resolver: BackendResolver,
}

impl SystemCoordinator {
    pub fn new(config: Config) -> Self {
        let resolver = BackendResolver::from_config(&config);
        Self::with_resolver(config, resolver)
    }

    pub fn with_resolver(config: Config, resolver: BackendResolver) -> Self {
        Self {
            task_manager: TaskManager::new(),
            config,
            resolver,
        }
    }

    /// Token whose cancellation stops the daemon.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.task_manager.global_token.clone()
    }

    /// Resolves the PWM backend and starts the control loop.
    ///
    /// Failing to find any usable backend is fatal and logged with the full
    /// probe history.
    pub async fn start(&mut self) -> Result<()> {
        info!(
            "PWM backend candidates: {}",
            self.resolver.candidate_names().join(", ")
        );

        let driver = match self.resolver.resolve(self.config.gpio_pin).await {
            Ok(driver) => driver,
            Err(e) => {
                e.log_diagnostics();
                return Err(e).context("Backend resolution failed");
            }
        };

        self.spawn_control_loop(driver);
        Ok(())
    }

    fn spawn_control_loop(&mut self, driver: Box<dyn PwmDriver>) {
        let control = ControlLoop::new(
            driver,
            Box::new(ThermalZoneSensor::new(&self.config.thermal_zone)),
            OverrideReader::new(&self.config.override_file),
            StatusPublisher::new(&self.config.status_file),
        );

        self.task_manager
            .spawn_task(CONTROL_TASK, |cancel| async move {
                control.run(cancel).await.map(|_| ())
            });
    }

    /// Waits for a stop request, then shuts down gracefully.
    pub async fn run_main_loop(&mut self) -> Result<()> {
        let mut sigterm =
            signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
        let token = self.shutdown_token();
        info!("Starting main loop");

        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    self.shutdown().await?;
                    bail!("Failed to listen for shutdown signal: {e}");
                }
                info!("Received Ctrl+C, initiating graceful shutdown...");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, initiating graceful shutdown...");
            }
            () = token.cancelled() => {
                info!("Shutdown requested, initiating graceful shutdown...");
            }
        }

        self.shutdown().await?;
        info!("Main loop terminated");
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<()> {
        info!("Initiating graceful shutdown...");

        if let Err(e) = self.task_manager.shutdown_all().await {
            error!("Error during task shutdown: {e:#}");
        }

        info!("Shutdown complete");
        Ok(())
    }
}
