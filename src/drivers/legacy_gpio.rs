//! Pins driven through the legacy per-pin GPIO file interface.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use log::{debug, info};

use crate::{
    drivers::{
        chip_base::ChipBaseStrategy,
        software_pwm::{OutputPin, SoftwarePwm},
        sysfs::{wait_for_path, write_attr},
    },
    pwm_driver::{BackendMode, PwmDriver},
    resolver::BackendCandidate,
};

const EXPORT_SETTLE: Duration = Duration::from_millis(100);

/// Exported legacy GPIO.
///
/// `number` is what the kernel calls the pin and may differ from the board
/// number by the controller base. The pin is unexported on release or drop.
#[derive(Debug)]
pub struct LegacyGpioPin {
    root: PathBuf,
    logical: u32,
    number: u32,
    exported: bool,
}

/// Kernel numbers to try for a board pin: offset first, then raw.
pub fn numbering_candidates(logical: u32, base: Option<u32>) -> Vec<u32> {
    let mut numbers = Vec::with_capacity(2);
    if let Some(offset) = base.and_then(|base| base.checked_add(logical)) {
        numbers.push(offset);
    }
    if !numbers.contains(&logical) {
        numbers.push(logical);
    }
    numbers
}

impl LegacyGpioPin {
    /// Exports the pin and configures it as an output.
    ///
    /// A pin already exported under either numbering is adopted. Nothing
    /// stays exported when this fails.
    pub async fn export(root: &Path, logical: u32, base: Option<u32>) -> Result<Self> {
        let export = root.join("export");
        if !export.exists() {
            bail!("Legacy GPIO interface not available at {}", export.display());
        }

        let candidates = numbering_candidates(logical, base);
        let adopted = candidates
            .iter()
            .copied()
            .find(|number| gpio_dir(root, *number).is_dir());

        let number = match adopted {
            Some(number) => {
                debug!("GPIO {logical} already exported as {number}");
                number
            }
            None => Self::export_any(root, logical, &candidates).await?,
        };

        let mut pin = Self {
            root: root.to_path_buf(),
            logical,
            number,
            exported: true,
        };
        if let Err(e) = write_attr(&pin.dir().join("direction"), "out") {
            if let Err(cleanup) = pin.unexport() {
                debug!("Unexport of GPIO {number} failed: {cleanup}");
            }
            return Err(e).with_context(|| format!("Failed to set GPIO {logical} as output"));
        }
        Ok(pin)
    }

    async fn export_any(root: &Path, logical: u32, candidates: &[u32]) -> Result<u32> {
        let mut failures = Vec::new();
        for &number in candidates {
            if let Err(e) = write_attr(&root.join("export"), number) {
                failures.push(format!("{number}: {e:#}"));
                continue;
            }
            if wait_for_path(&gpio_dir(root, number), EXPORT_SETTLE).await {
                info!("Exported GPIO {logical} as {number}");
                return Ok(number);
            }
            failures.push(format!("{number}: exported node did not appear"));
            if let Err(e) = write_attr(&root.join("unexport"), number) {
                debug!("Unexport of GPIO {number} failed: {e}");
            }
        }
        Err(anyhow!(
            "Failed to export GPIO {logical} (tried {candidates:?}): {}",
            failures.join("; ")
        ))
    }

    pub fn number(&self) -> u32 {
        self.number
    }

    pub fn is_exported(&self) -> bool {
        self.exported
    }

    fn dir(&self) -> PathBuf {
        gpio_dir(&self.root, self.number)
    }

    fn unexport(&mut self) -> Result<()> {
        if !self.exported {
            return Ok(());
        }
        self.exported = false;
        write_attr(&self.root.join("unexport"), self.number)
    }
}

fn gpio_dir(root: &Path, number: u32) -> PathBuf {
    root.join(format!("gpio{number}"))
}

impl OutputPin for LegacyGpioPin {
    fn pin(&self) -> u32 {
        self.logical
    }

    fn set_level(&mut self, high: bool) -> Result<()> {
        if !self.exported {
            bail!("GPIO {} is not exported", self.logical);
        }
        write_attr(&self.dir().join("value"), u8::from(high))
    }

    fn release(&mut self) -> Result<()> {
        self.unexport()
    }
}

impl Drop for LegacyGpioPin {
    fn drop(&mut self) {
        if let Err(e) = self.unexport() {
            debug!("Unexport of GPIO {} on drop failed: {e}", self.number);
        }
    }
}

/// Candidate using the legacy numbering interface with a detected offset.
#[derive(Debug, Clone)]
pub struct LegacyGpioCandidate {
    root: PathBuf,
    base: Arc<dyn ChipBaseStrategy>,
    period: Duration,
}

impl LegacyGpioCandidate {
    pub fn new(
        root: impl Into<PathBuf>,
        base: Arc<dyn ChipBaseStrategy>,
        period: Duration,
    ) -> Self {
        Self {
            root: root.into(),
            base,
            period,
        }
    }
}

#[async_trait]
impl BackendCandidate for LegacyGpioCandidate {
    fn name(&self) -> &'static str {
        "legacy-gpio"
    }

    async fn probe(&self, pin: u32) -> Result<Box<dyn PwmDriver>> {
        let base = self.base.base(&self.root);
        let gpio = LegacyGpioPin::export(&self.root, pin, base).await?;
        info!("GPIO {pin} configured as output (kernel number {})", gpio.number());
        Ok(Box::new(SoftwarePwm::new(
            gpio,
            BackendMode::SoftwarePwmLegacyGpio,
            self.period,
        )))
    }

    async fn check_available(&self, pin: u32) -> Result<()> {
        let base = self.base.base(&self.root);
        LegacyGpioPin::export(&self.root, pin, base).await?.release()
    }

    fn diagnose(&self) -> Option<String> {
        let export = self.root.join("export");
        (!export.exists()).then(|| {
            format!(
                "Legacy GPIO interface not available at {}, only gpiochip devices may exist",
                export.display()
            )
        })
    }
}
