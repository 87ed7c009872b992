use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::Config;

/// fan-controld: temperature driven PWM fan control for single-board computers
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// YAML config file path (default: /etc/fan-controld/config.yml)
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Board pin driving the fan
    #[arg(short = 'p', long = "pin", env = "GPIO_PIN")]
    pub pin: Option<u32>,

    /// Detach from the terminal and run in the background
    #[arg(short = 'd', long = "daemonize", default_value = "false")]
    pub daemonize: bool,

    /// Log debug messages
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    /// Where to publish the status document
    #[arg(long = "status-file")]
    pub status_file: Option<PathBuf>,

    /// Where to read manual overrides from
    #[arg(long = "override-file")]
    pub override_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run the control loop (default)
    Run,
    /// Print the last published status document
    Status,
    /// Print recent daemon log lines
    Logs {
        #[arg(short = 'n', long = "lines", default_value_t = 50)]
        lines: usize,
    },
}

impl Cli {
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Run)
    }

    /// Lets command line flags win over the configuration file.
    pub fn apply_to(&self, config: &mut Config) {
        if let Some(pin) = self.pin {
            config.gpio_pin = pin;
        }
        if let Some(path) = &self.status_file {
            config.status_file = path.clone();
        }
        if let Some(path) = &self.override_file {
            config.override_file = path.clone();
        }
    }
}
