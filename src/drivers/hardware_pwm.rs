//! SoC PWM peripheral exposed through the kernel PWM class.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use log::{debug, info};
use tokio_util::sync::CancellationToken;

use crate::{
    config::HardwarePwmCfg,
    drivers::sysfs::{read_trimmed, wait_for_path, write_attr},
    pwm_driver::{BackendMode, PwmDriver, duty_ns},
    resolver::BackendCandidate,
};

const EXPORT_SETTLE: Duration = Duration::from_millis(200);

/// One exported channel of a PWM chip.
///
/// The period is programmed once when the channel is opened and never changes.
#[derive(Debug)]
pub struct PwmChannel {
    chip: PathBuf,
    index: u32,
    period_ns: u64,
    duty_ns: u64,
    enabled: bool,
}

impl PwmChannel {
    /// Exports (or adopts) the channel and programs its period.
    ///
    /// On failure the channel is disabled and unexported again.
    pub async fn open(chip: &Path, index: u32, period: Duration) -> Result<Self> {
        if !chip.is_dir() {
            bail!("PWM chip {} not found", chip.display());
        }

        let npwm: u32 = read_trimmed(&chip.join("npwm"))?
            .parse()
            .with_context(|| format!("Invalid npwm in {}", chip.display()))?;
        if index >= npwm {
            bail!(
                "PWM channel {index} not available ({} has {npwm} channels)",
                chip.display()
            );
        }

        let mut channel = Self {
            chip: chip.to_path_buf(),
            index,
            period_ns: u64::try_from(period.as_nanos()).context("PWM period out of range")?,
            duty_ns: 0,
            enabled: false,
        };

        if channel.path().is_dir() {
            debug!("PWM channel {} already exported", channel.path().display());
        } else {
            write_attr(&chip.join("export"), index)?;
            if !wait_for_path(&channel.path(), EXPORT_SETTLE).await {
                channel.release();
                bail!(
                    "Exported PWM channel {index} but {} did not appear",
                    channel.path().display()
                );
            }
        }

        if let Err(e) = channel.program() {
            channel.release();
            return Err(e);
        }
        Ok(channel)
    }

    pub fn path(&self) -> PathBuf {
        self.chip.join(format!("pwm{}", self.index))
    }

    pub fn period_ns(&self) -> u64 {
        self.period_ns
    }

    pub fn duty_ns(&self) -> u64 {
        self.duty_ns
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_duty_ns(&mut self, duty: u64) -> Result<()> {
        let duty = duty.min(self.period_ns);
        write_attr(&self.path().join("duty_cycle"), duty)?;
        self.duty_ns = duty;
        Ok(())
    }

    fn program(&mut self) -> Result<()> {
        // A stale duty above the new period would make the period write fail.
        self.set_duty_ns(0)?;
        write_attr(&self.path().join("period"), self.period_ns)?;
        write_attr(&self.path().join("enable"), 1)?;
        self.enabled = true;
        Ok(())
    }

    /// Disables and unexports the channel, reporting the first failure.
    pub fn close(&mut self) -> Result<()> {
        let mut result = Ok(());
        if self.path().is_dir() {
            result = self
                .set_duty_ns(0)
                .and_then(|()| write_attr(&self.path().join("enable"), 0));
        }
        self.enabled = false;
        result.and(write_attr(&self.chip.join("unexport"), self.index))
    }

    fn release(&mut self) {
        if let Err(e) = self.close() {
            debug!("Cleanup of PWM channel {} failed: {e}", self.index);
        }
    }
}

/// Hardware PWM backend. Duty writes return immediately.
#[derive(Debug)]
pub struct HardwarePwm {
    pin: u32,
    channel: PwmChannel,
}

impl HardwarePwm {
    pub async fn probe(pwm_root: &Path, cfg: &HardwarePwmCfg, period: Duration) -> Result<Self> {
        let chip = pwm_root.join(format!("pwmchip{}", cfg.chip));
        let channel = PwmChannel::open(&chip, cfg.channel, period)
            .await
            .with_context(|| format!("Hardware PWM unavailable for GPIO {}", cfg.pin))?;
        info!("Hardware PWM enabled on {}", channel.path().display());
        Ok(Self {
            pin: cfg.pin,
            channel,
        })
    }

    pub fn channel(&self) -> &PwmChannel {
        &self.channel
    }
}

#[async_trait]
impl PwmDriver for HardwarePwm {
    fn mode(&self) -> BackendMode {
        BackendMode::HardwarePwm
    }

    fn pin(&self) -> u32 {
        self.pin
    }

    fn holds_interval(&self) -> bool {
        false
    }

    async fn set_duty_cycle(
        &mut self,
        percent: u8,
        _interval: Duration,
        _cancel: &CancellationToken,
    ) -> Result<()> {
        let duty = duty_ns(self.channel.period_ns(), percent);
        self.channel
            .set_duty_ns(duty)
            .with_context(|| format!("Failed to set PWM duty cycle to {percent}%"))
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.channel.close()
    }
}

/// Candidate for the pins wired to the PWM peripheral.
#[derive(Debug, Clone)]
pub struct HardwarePwmCandidate {
    pwm_root: PathBuf,
    pins: Vec<HardwarePwmCfg>,
    period: Duration,
}

impl HardwarePwmCandidate {
    pub fn new(pwm_root: impl Into<PathBuf>, pins: Vec<HardwarePwmCfg>, period: Duration) -> Self {
        Self {
            pwm_root: pwm_root.into(),
            pins,
            period,
        }
    }

    fn wiring(&self, pin: u32) -> Option<&HardwarePwmCfg> {
        self.pins.iter().find(|cfg| cfg.pin == pin)
    }
}

#[async_trait]
impl BackendCandidate for HardwarePwmCandidate {
    fn name(&self) -> &'static str {
        "hardware-pwm"
    }

    fn qualifies(&self, pin: u32) -> bool {
        self.wiring(pin).is_some()
    }

    async fn probe(&self, pin: u32) -> Result<Box<dyn PwmDriver>> {
        let cfg = self
            .wiring(pin)
            .with_context(|| format!("GPIO {pin} is not wired to the PWM peripheral"))?;
        let driver = HardwarePwm::probe(&self.pwm_root, cfg, self.period).await?;
        Ok(Box::new(driver))
    }

    fn diagnose(&self) -> Option<String> {
        let chips: Vec<_> = self
            .pins
            .iter()
            .map(|cfg| self.pwm_root.join(format!("pwmchip{}", cfg.chip)))
            .filter(|chip| !chip.exists())
            .collect();
        if chips.is_empty() {
            return None;
        }
        Some(format!(
            "PWM chip {} not found, enable the PWM overlay to use hardware PWM",
            chips[0].display()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::{TempDir, tempdir};

    const PERIOD: Duration = Duration::from_millis(10);

    fn fake_chip(npwm: u32, exported: &[u32]) -> (TempDir, PathBuf) {
        let root = tempdir().unwrap();
        let chip = root.path().join("pwmchip0");
        fs::create_dir(&chip).unwrap();
        fs::write(chip.join("npwm"), format!("{npwm}\n")).unwrap();
        fs::write(chip.join("export"), "").unwrap();
        fs::write(chip.join("unexport"), "").unwrap();
        for idx in exported {
            let channel = chip.join(format!("pwm{idx}"));
            fs::create_dir(&channel).unwrap();
            for attr in ["period", "duty_cycle", "enable"] {
                fs::write(channel.join(attr), "0").unwrap();
            }
        }
        (root, chip)
    }

    fn attr(chip: &Path, channel: u32, name: &str) -> String {
        fs::read_to_string(chip.join(format!("pwm{channel}")).join(name)).unwrap()
    }

    fn gpio12() -> HardwarePwmCfg {
        HardwarePwmCfg {
            pin: 12,
            chip: 0,
            channel: 0,
        }
    }

    #[tokio::test]
    async fn adopts_exported_channel_and_programs_period() {
        let (_root, chip) = fake_chip(2, &[0]);
        fs::write(chip.join("pwm0/duty_cycle"), "99999999").unwrap();

        let channel = PwmChannel::open(&chip, 0, PERIOD).await.unwrap();

        assert_eq!(attr(&chip, 0, "period"), "10000000");
        assert_eq!(attr(&chip, 0, "duty_cycle"), "0");
        assert_eq!(attr(&chip, 0, "enable"), "1");
        assert!(channel.is_enabled());
        assert_eq!(channel.period_ns(), 10_000_000);
    }

    #[tokio::test]
    async fn missing_chip_fails_without_side_effects() {
        let root = tempdir().unwrap();
        let err = PwmChannel::open(&root.path().join("pwmchip0"), 0, PERIOD)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not found"));
        assert_eq!(fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn channel_beyond_npwm_is_rejected() {
        let (_root, chip) = fake_chip(1, &[]);
        let err = PwmChannel::open(&chip, 1, PERIOD).await.unwrap_err();
        assert!(err.to_string().contains("has 1 channels"));
        assert_eq!(fs::read_to_string(chip.join("export")).unwrap(), "");
    }

    #[tokio::test(start_paused = true)]
    async fn export_that_never_appears_is_unexported() {
        let (_root, chip) = fake_chip(2, &[]);

        let err = PwmChannel::open(&chip, 1, PERIOD).await.unwrap_err();

        assert!(err.to_string().contains("did not appear"));
        assert_eq!(fs::read_to_string(chip.join("export")).unwrap(), "1");
        assert_eq!(fs::read_to_string(chip.join("unexport")).unwrap(), "1");
    }

    #[tokio::test]
    async fn failed_programming_unexports() {
        let (_root, chip) = fake_chip(2, &[0]);
        fs::remove_file(chip.join("pwm0/period")).unwrap();
        fs::create_dir(chip.join("pwm0/period")).unwrap();

        assert!(PwmChannel::open(&chip, 0, PERIOD).await.is_err());
        assert_eq!(fs::read_to_string(chip.join("unexport")).unwrap(), "0");
        assert_eq!(attr(&chip, 0, "enable"), "0");
    }

    #[tokio::test]
    async fn duty_writes_follow_percentage() {
        let (root, chip) = fake_chip(2, &[0]);
        let mut pwm = HardwarePwm::probe(root.path(), &gpio12(), PERIOD).await.unwrap();
        let cancel = CancellationToken::new();

        for (percent, expected) in [(60, "6000000"), (85, "8500000"), (100, "10000000"), (0, "0")] {
            pwm.set_duty_cycle(percent, Duration::from_secs(60), &cancel)
                .await
                .unwrap();
            assert_eq!(attr(&chip, 0, "duty_cycle"), expected);
            assert_eq!(pwm.channel().duty_ns().to_string(), expected);
        }
        assert!(!pwm.holds_interval());
        assert_eq!(pwm.mode(), BackendMode::HardwarePwm);
        assert_eq!(pwm.pin(), 12);
    }

    #[tokio::test]
    async fn shutdown_disables_and_unexports() {
        let (root, chip) = fake_chip(2, &[0]);
        let mut pwm = HardwarePwm::probe(root.path(), &gpio12(), PERIOD).await.unwrap();
        pwm.set_duty_cycle(85, Duration::ZERO, &CancellationToken::new())
            .await
            .unwrap();

        pwm.shutdown().await.unwrap();

        assert_eq!(attr(&chip, 0, "duty_cycle"), "0");
        assert_eq!(attr(&chip, 0, "enable"), "0");
        assert_eq!(fs::read_to_string(chip.join("unexport")).unwrap(), "0");
        assert!(!pwm.channel().is_enabled());
    }

    #[test]
    fn only_wired_pins_qualify() {
        let candidate = HardwarePwmCandidate::new(
            "/sys/class/pwm",
            vec![
                gpio12(),
                HardwarePwmCfg {
                    pin: 18,
                    chip: 0,
                    channel: 1,
                },
            ],
            PERIOD,
        );
        assert!(candidate.qualifies(12));
        assert!(candidate.qualifies(18));
        assert!(!candidate.qualifies(13));
    }

    #[test]
    fn diagnose_reports_missing_chip() {
        let root = tempdir().unwrap();
        let candidate = HardwarePwmCandidate::new(root.path(), vec![gpio12()], PERIOD);
        assert!(candidate.diagnose().unwrap().contains("pwmchip0"));
    }
}
