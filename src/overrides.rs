//! Manual override document written by the status service.

use std::{io::ErrorKind, path::PathBuf};

use anyhow::{Context, Result};
use log::debug;
use serde::Deserialize;

/// Operator override of the temperature driven duty cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Overrides {
    pub manual_mode: bool,
    /// Always within `0..=100`.
    pub manual_duty_cycle: u8,
}

#[derive(Debug, Deserialize)]
struct RawOverrides {
    #[serde(default)]
    manual_mode: bool,
    #[serde(default)]
    manual_duty_cycle: f64,
}

impl From<RawOverrides> for Overrides {
    fn from(raw: RawOverrides) -> Self {
        Self {
            manual_mode: raw.manual_mode,
            manual_duty_cycle: clamp_percent(raw.manual_duty_cycle),
        }
    }
}

fn clamp_percent(value: f64) -> u8 {
    value.clamp(0.0, 100.0).round() as u8
}

/// Parses an override document, clamping the duty cycle into range.
pub fn parse(content: &str) -> Result<Overrides> {
    let raw: RawOverrides =
        serde_json::from_str(content).context("Malformed override document")?;
    Ok(raw.into())
}

/// Reads the override document once per control iteration.
#[derive(Debug, Clone)]
pub struct OverrideReader {
    path: PathBuf,
}

impl OverrideReader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the document's values, or `current` if it is absent or broken.
    pub async fn refresh(&self, current: Overrides) -> Overrides {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return current,
            Err(e) => {
                debug!("Cannot read {}: {e}", self.path.display());
                return current;
            }
        };

        match parse(&content) {
            Ok(overrides) => overrides,
            Err(e) => {
                debug!("Ignoring {}: {e:#}", self.path.display());
                current
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::tempdir;

    const MANUAL_40: Overrides = Overrides {
        manual_mode: true,
        manual_duty_cycle: 40,
    };

    #[test]
    fn parses_complete_document() {
        let overrides = parse(r#"{"manual_mode": true, "manual_duty_cycle": 40}"#).unwrap();
        assert_eq!(overrides, MANUAL_40);
    }

    #[test]
    fn clamps_out_of_range_duty() {
        let high = parse(r#"{"manual_mode": true, "manual_duty_cycle": 150}"#).unwrap();
        assert_eq!(high.manual_duty_cycle, 100);

        let low = parse(r#"{"manual_mode": true, "manual_duty_cycle": -20}"#).unwrap();
        assert_eq!(low.manual_duty_cycle, 0);

        let fractional = parse(r#"{"manual_duty_cycle": 42.6}"#).unwrap();
        assert_eq!(fractional.manual_duty_cycle, 43);
    }

    #[test]
    fn missing_fields_default() {
        assert_eq!(parse("{}").unwrap(), Overrides::default());
        assert_eq!(
            parse(r#"{"manual_mode": true}"#).unwrap(),
            Overrides {
                manual_mode: true,
                manual_duty_cycle: 0
            }
        );
    }

    #[test]
    fn rejects_wrong_types() {
        assert!(parse(r#"{"manual_mode": "yes"}"#).is_err());
        assert!(parse(r#"{"manual_duty_cycle": "40"}"#).is_err());
        assert!(parse("not json").is_err());
    }

    #[tokio::test]
    async fn missing_file_retains_current() {
        let dir = tempdir().unwrap();
        let reader = OverrideReader::new(dir.path().join("config.json"));
        assert_eq!(reader.refresh(MANUAL_40).await, MANUAL_40);
    }

    #[tokio::test]
    async fn malformed_file_retains_current() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{\"manual_mode\": tru").unwrap();

        let reader = OverrideReader::new(&path);
        assert_eq!(reader.refresh(MANUAL_40).await, MANUAL_40);
    }

    #[tokio::test]
    async fn valid_file_replaces_current() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"manual_mode": false, "manual_duty_cycle": 70}"#).unwrap();

        let reader = OverrideReader::new(&path);
        assert_eq!(
            reader.refresh(MANUAL_40).await,
            Overrides {
                manual_mode: false,
                manual_duty_cycle: 70
            }
        );
    }
}
