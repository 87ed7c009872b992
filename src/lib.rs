//! # fan_controld
//!
//! A Linux daemon regulating a PWM cooling fan on single-board computers.
//!
//! ## Features
//!
//! - **Backend Discovery**: Hardware PWM, GPIO character device or legacy
//!   GPIO files, whichever the running kernel offers
//! - **Pin Fallback**: Alternate header pins are scanned when the configured
//!   one cannot be driven
//! - **Temperature Control**: Banded duty cycles from the SoC thermal zone
//! - **Manual Override**: Fixed duty cycle requested through a JSON document
//! - **Status Publishing**: Atomic JSON snapshot after every iteration
//!
//! ## Architecture
//!
//! - [`BackendResolver`](resolver::BackendResolver) - Picks the PWM mechanism once at startup
//! - [`ControlLoop`](control_loop::ControlLoop) - Temperature to duty cycle loop
//! - [`SystemCoordinator`](coordinator::SystemCoordinator) - Lifecycle and signal handling
//!
//! ## Example
//!
//! ```no_run
//! use fan_controld::{application::Application, config::ConfigManager};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ConfigManager::load(None)?.into_config();
//!     Application::builder()
//!         .with_config(config)
//!         .build()?
//!         .run()
//!         .await
//! }
//! ```

pub mod application;
pub mod cli;
pub mod config;
pub mod control_loop;
pub mod coordinator;
pub mod drivers;
pub mod logs;
pub mod overrides;
pub mod pwm_driver;
pub mod resolver;
pub mod sensors;
pub mod status;
pub mod task_manager;
pub mod temperature_sensors;
