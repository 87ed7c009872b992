//! Application entry point and builder pattern implementation.

use crate::{config::Config, coordinator::SystemCoordinator};
use anyhow::{Result, anyhow};

/// Main application structure that drives the daemon from backend
/// resolution to shutdown through the [`SystemCoordinator`].
///
/// # Example
///
/// ```no_run
/// use fan_controld::application::Application;
/// use fan_controld::config::ConfigManager;
///
/// # async fn example() -> anyhow::Result<()> {
/// let config = ConfigManager::load(None)?.into_config();
/// let mut app = Application::builder().with_config(config).build()?;
///
/// app.run().await?;
/// # Ok(())
/// # }
/// ```
pub struct Application {
    pub coordinator: SystemCoordinator,
}

impl Application {
    /// Creates a new ApplicationBuilder for constructing Application instances.
    pub fn builder() -> ApplicationBuilder {
        ApplicationBuilder::new()
    }

    /// Resolves the backend, runs the control loop and waits for a stop signal.
    pub async fn run(&mut self) -> Result<()> {
        self.coordinator.start().await?;
        self.coordinator.run_main_loop().await
    }
}

/// Builder pattern for creating Application instances.
pub struct ApplicationBuilder {
    config: Option<Config>,
}

impl ApplicationBuilder {
    fn new() -> Self {
        Self { config: None }
    }

    pub fn with_config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Builds the Application, validating the configuration first.
    pub fn build(self) -> Result<Application> {
        let config = self
            .config
            .ok_or_else(|| anyhow!("Configuration is required"))?;
        config.validate()?;

        Ok(Application {
            coordinator: SystemCoordinator::new(config),
        })
    }
}
