use std::{fs::File, process::ExitCode};

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use daemonize::Daemonize;
use log::{LevelFilter, error};
use syslog::{BasicLogger, Facility, Formatter3164};
use tokio::runtime::Runtime;

use fan_controld::{
    application::Application,
    cli::{Cli, Command},
    config::{Config, ConfigManager},
    logs::recent_logs,
    status::StatusPublisher,
};

const DAEMON_OUTPUT: &str = "/var/tmp/fan-controld.log";

fn init_log(verbose: bool) -> Result<()> {
    let level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    syslog::unix(Formatter3164 {
        facility: Facility::LOG_USER,
        hostname: None,
        process: "fan-controld".into(),
        pid: std::process::id(),
    })
    .map_err(|e| anyhow!("{e}"))
    .and_then(|logger| {
        log::set_boxed_logger(Box::new(BasicLogger::new(logger)))
            .map(|_| log::set_max_level(level))
            .map_err(|e| anyhow!("{e}"))
    })
}

fn into_daemon() -> Result<()> {
    File::create(DAEMON_OUTPUT)
        .and_then(|out| Ok((out.try_clone()?, out)))
        .with_context(|| format!("Failed to create {DAEMON_OUTPUT}"))
        .and_then(|(stderr, stdout)| {
            Daemonize::new()
                .stdout(stdout)
                .stderr(stderr)
                .start()
                .map_err(|e| anyhow!("{e}"))
        })
}

fn runtime() -> Result<Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")
}

async fn print_status(config: &Config) -> Result<()> {
    let status = StatusPublisher::new(&config.status_file).read().await?;
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

async fn print_logs(config: &Config, lines: usize) -> Result<()> {
    for line in recent_logs(&config.log_unit, lines, &config.log_file).await? {
        println!("{line}");
    }
    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    let mut config = ConfigManager::load(cli.config.clone())?.into_config();
    cli.apply_to(&mut config);

    match cli.command() {
        Command::Run => {
            if cli.daemonize {
                into_daemon()?;
            }
            // The runtime's worker threads must not exist before the fork.
            runtime()?.block_on(async {
                Application::builder()
                    .with_config(config)
                    .build()?
                    .run()
                    .await
            })
        }
        Command::Status => runtime()?.block_on(print_status(&config)),
        Command::Logs { lines } => runtime()?.block_on(print_logs(&config, lines)),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_log(cli.verbose) {
        eprintln!("fan-controld: syslog unavailable: {e}");
    }

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            eprintln!("fan-controld: {e:#}");
            ExitCode::FAILURE
        }
    }
}
