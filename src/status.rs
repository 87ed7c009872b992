//! Status document published for the status service.

use std::{
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use anyhow::{Context, Result};
use log::debug;
use serde::{Deserialize, Serialize};
use tokio::fs;

/// Snapshot of the control loop, replaced wholesale on every publish.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Status {
    /// Degrees Celsius rounded to one decimal, `None` when unreadable.
    pub temperature: Option<f64>,
    pub duty_cycle: u8,
    /// `"hardware"`, `"software"` or `"unknown"`.
    pub pwm_mode: String,
    pub gpio_pin: u32,
    pub manual_mode: bool,
    /// Set only while manual mode is active.
    pub manual_duty_cycle: Option<u8>,
    /// Seconds since the Unix epoch.
    pub last_update: f64,
    pub error: Option<String>,
}

pub fn round_temperature(celsius: f64) -> f64 {
    (celsius * 10.0).round() / 10.0
}

pub fn epoch_seconds(at: SystemTime) -> f64 {
    at.duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs_f64())
        .unwrap_or_default()
}

/// Writes the status document atomically.
#[derive(Debug, Clone)]
pub struct StatusPublisher {
    path: PathBuf,
}

impl StatusPublisher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replaces the document through a temporary file and a rename, so
    /// readers never observe a partial write.
    pub async fn publish(&self, status: &Status) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let json = serde_json::to_string_pretty(status).context("Failed to serialize status")?;

        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, json).await.with_context(|| {
            format!("Failed to write temporary status to {}", tmp_path.display())
        })?;

        fs::rename(&tmp_path, &self.path)
            .await
            .with_context(|| format!("Failed to move status to {}", self.path.display()))?;

        debug!("Status published: duty {}%", status.duty_cycle);
        Ok(())
    }

    pub async fn read(&self) -> Result<Status> {
        let content = fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read status file {}", self.path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Malformed status file {}", self.path.display()))
    }
}
