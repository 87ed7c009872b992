//! Recent daemon log lines, from the journal or a static log file.

use std::{ffi::OsString, io::ErrorKind, path::Path, process::Stdio, time::Duration};

use anyhow::{Context, Result, bail};
use log::debug;
use tokio::{process::Command, time::timeout};

pub const JOURNAL_TIMEOUT: Duration = Duration::from_secs(2);

/// Bounded `journalctl` invocation.
#[derive(Debug, Clone)]
pub struct JournalSource {
    program: OsString,
    timeout: Duration,
}

impl Default for JournalSource {
    fn default() -> Self {
        Self::new("journalctl", JOURNAL_TIMEOUT)
    }
}

impl JournalSource {
    pub fn new(program: impl Into<OsString>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    /// Last `lines` journal entries of `unit`, blank lines dropped.
    pub async fn read(&self, unit: &str, lines: usize) -> Result<Vec<String>> {
        let mut command = Command::new(&self.program);
        command
            .args(["-u", unit, "-n", &lines.to_string(), "--no-pager"])
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = timeout(self.timeout, command.output())
            .await
            .with_context(|| format!("journalctl did not answer within {:?}", self.timeout))?
            .context("Failed to run journalctl")?;

        if !output.status.success() {
            bail!("journalctl exited with {}", output.status);
        }

        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Journal lines, or the tail of `fallback` when the journal is unusable.
    pub async fn recent(&self, unit: &str, lines: usize, fallback: &Path) -> Result<Vec<String>> {
        match self.read(unit, lines).await {
            Ok(entries) => Ok(entries),
            Err(e) => {
                debug!("Journal unavailable ({e:#}), reading {}", fallback.display());
                tail_file(fallback, lines).await
            }
        }
    }
}

pub async fn recent_logs(unit: &str, lines: usize, fallback: &Path) -> Result<Vec<String>> {
    JournalSource::default().recent(unit, lines, fallback).await
}

/// Last `lines` lines of `path`; an absent file has none.
pub async fn tail_file(path: &Path, lines: usize) -> Result<Vec<String>> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to read log file {}", path.display()));
        }
    };

    let all: Vec<&str> = content.lines().collect();
    let start = all.len().saturating_sub(lines);
    Ok(all[start..].iter().map(|line| line.to_string()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serial_test::serial;
    use std::{fs, os::unix::fs::PermissionsExt, path::PathBuf};
    use tempfile::{TempDir, tempdir};

    fn script(dir: &TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("journalctl");
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn fallback(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("fan-control.log");
        fs::write(&path, "one\ntwo\nthree\nfour\n").unwrap();
        path
    }

    #[tokio::test]
    async fn tail_returns_last_lines() {
        let dir = tempdir().unwrap();
        let path = fallback(&dir);

        assert_eq!(tail_file(&path, 2).await.unwrap(), vec!["three", "four"]);
        assert_eq!(tail_file(&path, 10).await.unwrap().len(), 4);
        assert!(tail_file(&path, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn tail_of_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let lines = tail_file(&dir.path().join("absent.log"), 50).await.unwrap();
        assert!(lines.is_empty());
    }

    #[tokio::test]
    #[serial]
    async fn journal_output_is_used() {
        let dir = tempdir().unwrap();
        let program = script(&dir, "echo \"unit=$2 lines=$4\"\necho\necho second");
        let source = JournalSource::new(&program, JOURNAL_TIMEOUT);

        let lines = source
            .recent("fan-control.service", 20, &fallback(&dir))
            .await
            .unwrap();

        assert_eq!(lines, vec!["unit=fan-control.service lines=20", "second"]);
    }

    #[tokio::test]
    #[serial]
    async fn slow_journal_falls_back_to_file() {
        let dir = tempdir().unwrap();
        let program = script(&dir, "sleep 5\necho late");
        let source = JournalSource::new(&program, Duration::from_millis(200));

        let err = source.read("fan-control.service", 2).await.unwrap_err();
        assert!(err.to_string().contains("did not answer"));

        let lines = source
            .recent("fan-control.service", 2, &fallback(&dir))
            .await
            .unwrap();
        assert_eq!(lines, vec!["three", "four"]);
    }

    #[tokio::test]
    #[serial]
    async fn failing_journal_falls_back_to_file() {
        let dir = tempdir().unwrap();
        let program = script(&dir, "echo broken >&2\nexit 1");
        let source = JournalSource::new(&program, JOURNAL_TIMEOUT);

        let lines = source.recent("x", 1, &fallback(&dir)).await.unwrap();
        assert_eq!(lines, vec!["four"]);
    }

    #[tokio::test]
    async fn missing_journal_falls_back_to_file() {
        let dir = tempdir().unwrap();
        let source = JournalSource::new(dir.path().join("no-such-program"), JOURNAL_TIMEOUT);

        let lines = source.recent("x", 3, &fallback(&dir)).await.unwrap();
        assert_eq!(lines, vec!["two", "three", "four"]);
    }
}
