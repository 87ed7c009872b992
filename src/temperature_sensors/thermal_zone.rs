use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::sensors::TemperatureSensor;

/// SoC temperature read from a kernel thermal zone.
///
/// The zone file holds millidegrees Celsius as a decimal integer.
#[derive(Debug, Clone)]
pub struct ThermalZoneSensor {
    path: PathBuf,
}

impl ThermalZoneSensor {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl TemperatureSensor for ThermalZoneSensor {
    async fn read_temperature(&self) -> Result<f64> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read thermal zone {}", self.path.display()))?;
        parse_millidegrees(&raw)
            .with_context(|| format!("Unexpected thermal zone content in {}", self.path.display()))
    }

    fn key(&self) -> String {
        self.path.display().to_string()
    }
}

fn parse_millidegrees(raw: &str) -> Result<f64> {
    let millis: i64 = raw.trim().parse()?;
    Ok(millis as f64 / 1000.0)
}
