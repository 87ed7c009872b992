//! Small helpers for kernel attribute files.

use std::{fmt::Display, fs, path::Path, time::Duration};

use anyhow::{Context, Result};
use tokio::time::{Instant, sleep};

const POLL_STEP: Duration = Duration::from_millis(20);

pub fn read_trimmed(path: &Path) -> Result<String> {
    fs::read_to_string(path)
        .map(|s| s.trim().to_string())
        .with_context(|| format!("Failed to read {}", path.display()))
}

pub fn write_attr(path: &Path, value: impl Display) -> Result<()> {
    fs::write(path, value.to_string())
        .with_context(|| format!("Failed to write '{value}' to {}", path.display()))
}

/// Waits for a freshly exported node to appear.
pub async fn wait_for_path(path: &Path, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if path.exists() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        sleep(POLL_STEP).await;
    }
}
