//! Configuration management for the fan-controld daemon.
//!
//! Handles loading, parsing, and validation of the YAML settings file that
//! selects the fan pin, PWM frequency, kernel interface locations and the
//! documents shared with the status service.

use std::{
    collections::HashSet,
    env, fs,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result, bail};
use log::info;
use serde::{Deserialize, Serialize};

use crate::{
    drivers::chip_base::{ChipBaseStrategy, DetectedBase, FixedBase, NoOffset},
    pwm_driver::period_for_frequency,
};

/// Main configuration structure for the fan-controld daemon.
///
/// Every field has a default matching a Raspberry Pi style board, so an
/// empty file (or no file at all) yields a working setup.
///
/// # Example
///
/// ```yaml
/// version: 1
/// gpio_pin: 12
/// pwm_frequency_hz: 100
/// hardware_pwm:
///   - { pin: 12, chip: 0, channel: 0 }
///   - { pin: 18, chip: 0, channel: 1 }
/// legacy_gpio_base:
///   kind: auto
///   fallback: 512
/// fallback_pins: [5, 6, 13, 19, 26, 16, 20, 21]
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Configuration version for compatibility checking.
    #[serde(default = "defaults::version")]
    pub version: u8,

    /// Board-numbered pin driving the fan.
    #[serde(default = "defaults::gpio_pin")]
    pub gpio_pin: u32,

    /// PWM frequency, fixed for the process lifetime.
    ///
    /// Software backends cannot time periods below
    /// [`MIN_SOFTWARE_PERIOD`](crate::drivers::software_pwm::MIN_SOFTWARE_PERIOD)
    /// and run at 500 Hz when a higher frequency is configured.
    #[serde(default = "defaults::pwm_frequency_hz")]
    pub pwm_frequency_hz: u32,

    /// Status document published every iteration.
    #[serde(default = "defaults::status_file")]
    pub status_file: PathBuf,

    /// Manual override document written by the status service.
    #[serde(default = "defaults::override_file")]
    pub override_file: PathBuf,

    #[serde(default = "defaults::thermal_zone")]
    pub thermal_zone: PathBuf,

    #[serde(default = "defaults::gpio_sysfs")]
    pub gpio_sysfs: PathBuf,

    #[serde(default = "defaults::pwm_sysfs")]
    pub pwm_sysfs: PathBuf,

    #[serde(default = "defaults::gpio_chip_device")]
    pub gpio_chip_device: PathBuf,

    /// Pins wired to the PWM peripheral.
    #[serde(default = "defaults::hardware_pwm")]
    pub hardware_pwm: Vec<HardwarePwmCfg>,

    #[serde(default)]
    pub legacy_gpio_base: LegacyBaseCfg,

    /// Pins scanned when the configured one is unusable.
    #[serde(default = "defaults::fallback_pins")]
    pub fallback_pins: Vec<u32>,

    /// Static log source used when the journal is unavailable.
    #[serde(default = "defaults::log_file")]
    pub log_file: PathBuf,

    #[serde(default = "defaults::log_unit")]
    pub log_unit: String,
}

/// Wiring of a pin to a PWM chip channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwarePwmCfg {
    pub pin: u32,
    pub chip: u32,
    pub channel: u32,
}

/// How legacy GPIO numbers relate to board pin numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum LegacyBaseCfg {
    /// Inspect controller metadata, assume `fallback` if nothing matches.
    Auto {
        #[serde(default = "defaults::legacy_fallback_base")]
        fallback: Option<u32>,
    },
    Fixed {
        base: u32,
    },
    None,
}

impl Default for LegacyBaseCfg {
    fn default() -> Self {
        LegacyBaseCfg::Auto {
            fallback: defaults::legacy_fallback_base(),
        }
    }
}

impl LegacyBaseCfg {
    pub fn strategy(&self) -> Arc<dyn ChipBaseStrategy> {
        match *self {
            LegacyBaseCfg::Auto { fallback } => Arc::new(DetectedBase { fallback }),
            LegacyBaseCfg::Fixed { base } => Arc::new(FixedBase(base)),
            LegacyBaseCfg::None => Arc::new(NoOffset),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: defaults::version(),
            gpio_pin: defaults::gpio_pin(),
            pwm_frequency_hz: defaults::pwm_frequency_hz(),
            status_file: defaults::status_file(),
            override_file: defaults::override_file(),
            thermal_zone: defaults::thermal_zone(),
            gpio_sysfs: defaults::gpio_sysfs(),
            pwm_sysfs: defaults::pwm_sysfs(),
            gpio_chip_device: defaults::gpio_chip_device(),
            hardware_pwm: defaults::hardware_pwm(),
            legacy_gpio_base: LegacyBaseCfg::default(),
            fallback_pins: defaults::fallback_pins(),
            log_file: defaults::log_file(),
            log_unit: defaults::log_unit(),
        }
    }
}

impl Config {
    pub const MAX_FREQUENCY_HZ: u32 = 1_000_000;

    /// Validates the configuration for consistency.
    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            bail!("Unsupported config version {}", self.version);
        }

        if !(1..=Self::MAX_FREQUENCY_HZ).contains(&self.pwm_frequency_hz) {
            bail!(
                "PWM frequency {} Hz out of range (1..={} Hz)",
                self.pwm_frequency_hz,
                Self::MAX_FREQUENCY_HZ
            );
        }

        if self.hardware_pwm.len() > 2 {
            bail!(
                "At most two hardware PWM pins are supported, got {}",
                self.hardware_pwm.len()
            );
        }

        let mut seen = HashSet::new();
        if let Some(dup) = self.hardware_pwm.iter().find(|cfg| !seen.insert(cfg.pin)) {
            bail!("GPIO {} listed twice in hardware_pwm", dup.pin);
        }

        Ok(())
    }

    pub fn pwm_period(&self) -> Duration {
        period_for_frequency(self.pwm_frequency_hz)
    }
}

mod defaults {
    use std::path::PathBuf;

    use super::HardwarePwmCfg;

    pub fn version() -> u8 {
        1
    }

    /// The hardware PWM capable pin.
    pub fn gpio_pin() -> u32 {
        12
    }

    pub fn pwm_frequency_hz() -> u32 {
        100
    }

    pub fn status_file() -> PathBuf {
        PathBuf::from("/opt/hifiberry/fan-control/status.json")
    }

    pub fn override_file() -> PathBuf {
        PathBuf::from("/opt/hifiberry/fan-control/config.json")
    }

    pub fn thermal_zone() -> PathBuf {
        PathBuf::from("/sys/class/thermal/thermal_zone0/temp")
    }

    pub fn gpio_sysfs() -> PathBuf {
        PathBuf::from("/sys/class/gpio")
    }

    pub fn pwm_sysfs() -> PathBuf {
        PathBuf::from("/sys/class/pwm")
    }

    pub fn gpio_chip_device() -> PathBuf {
        PathBuf::from("/dev/gpiochip0")
    }

    pub fn hardware_pwm() -> Vec<HardwarePwmCfg> {
        vec![
            HardwarePwmCfg {
                pin: 12,
                chip: 0,
                channel: 0,
            },
            HardwarePwmCfg {
                pin: 18,
                chip: 0,
                channel: 1,
            },
        ]
    }

    pub fn legacy_fallback_base() -> Option<u32> {
        Some(512)
    }

    /// Header pins that are not claimed by I2C, SPI or UART.
    pub fn fallback_pins() -> Vec<u32> {
        vec![5, 6, 13, 19, 26, 16, 20, 21]
    }

    pub fn log_file() -> PathBuf {
        PathBuf::from("/var/log/fan-control.log")
    }

    pub fn log_unit() -> String {
        "fan-control.service".to_string()
    }
}

fn locate_config() -> Option<PathBuf> {
    if let Ok(env_path) = env::var("FAN_CONTROLD_CONFIG") {
        return Some(PathBuf::from(env_path));
    }

    if let Some(mut cfg_dir) = env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| env::var_os("HOME").map(|h| Path::new(&h).join(".config")))
    {
        cfg_dir.push("fan-controld/config.yml");
        if cfg_dir.exists() {
            return Some(cfg_dir);
        }
    }

    let etc = Path::new("/etc/fan-controld/config.yml");
    etc.exists().then(|| etc.to_path_buf())
}

/// Loaded configuration together with the file it came from.
///
/// # Example
///
/// ```no_run
/// use fan_controld::config::ConfigManager;
/// use std::path::PathBuf;
///
/// // Load from specific path
/// let manager = ConfigManager::load(Some(PathBuf::from("config.yml")))?;
///
/// // Load from standard locations, falling back to defaults
/// let manager = ConfigManager::load(None)?;
/// let pin = manager.config().gpio_pin;
/// # Ok::<(), anyhow::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config: Config,
    path: Option<PathBuf>,
}

impl ConfigManager {
    pub fn new(config: Config, path: Option<PathBuf>) -> Self {
        Self { config, path }
    }

    /// Loads configuration from file or standard locations.
    ///
    /// Searches for configuration in the following order:
    /// 1. Provided path parameter
    /// 2. FAN_CONTROLD_CONFIG environment variable
    /// 3. XDG_CONFIG_HOME/fan-controld/config.yml or ~/.config/fan-controld/config.yml
    /// 4. /etc/fan-controld/config.yml
    ///
    /// Built-in defaults are used when none of the standard locations exist.
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let Some(config_path) = path.or_else(locate_config) else {
            info!("No configuration file found, using built-in defaults");
            return Ok(Self::new(Config::default(), None));
        };

        info!("Loading config from: {}", config_path.display());
        let config = Self::load_config_from_path(&config_path)?;
        Ok(Self::new(config, Some(config_path)))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the path the configuration was read from, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn into_config(self) -> Config {
        self.config
    }

    fn load_config_from_path(path: &Path) -> Result<Config> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = if content.trim().is_empty() {
            Config::default()
        } else {
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse YAML in: {}", path.display()))?
        };

        config
            .validate()
            .with_context(|| format!("Configuration validation failed for: {}", path.display()))?;

        Ok(config)
    }
}
