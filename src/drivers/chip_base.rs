//! Offset between board numbering and legacy GPIO numbering.
//!
//! Newer kernels number the primary controller from a large base (512 on
//! recent Raspberry Pi kernels), older ones from zero. The base is detected
//! by a replaceable strategy because the layout is board specific.

use std::{
    fs,
    path::{Path, PathBuf},
};

use log::{debug, warn};

use crate::drivers::sysfs::read_trimmed;

/// Labels of controllers that carry the board-numbered header pins.
pub const PRIMARY_CONTROLLER_LABELS: &[&str] = &[
    "pinctrl-bcm2711",
    "pinctrl-bcm2835",
    "pinctrl-bcm2712",
    "pinctrl-rp1",
];

pub trait ChipBaseStrategy: Send + Sync + core::fmt::Debug {
    /// Base to add to a board pin number, `None` when raw numbering applies.
    fn base(&self, gpio_root: &Path) -> Option<u32>;
}

#[derive(Debug, Clone, Copy)]
pub struct FixedBase(pub u32);

impl ChipBaseStrategy for FixedBase {
    fn base(&self, _gpio_root: &Path) -> Option<u32> {
        Some(self.0)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct NoOffset;

impl ChipBaseStrategy for NoOffset {
    fn base(&self, _gpio_root: &Path) -> Option<u32> {
        None
    }
}

/// Inspects `gpiochip*` metadata to find the primary controller.
///
/// A known controller label wins, then a chip whose base equals `fallback`.
/// When nothing matches, `fallback` is assumed as is.
#[derive(Debug, Clone, Copy)]
pub struct DetectedBase {
    pub fallback: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpioChipInfo {
    pub path: PathBuf,
    pub base: u32,
    pub label: String,
}

impl DetectedBase {
    fn chips(gpio_root: &Path) -> Vec<GpioChipInfo> {
        let Ok(entries) = fs::read_dir(gpio_root) else {
            return Vec::new();
        };
        let mut chips: Vec<_> = entries
            .flatten()
            .filter(|entry| entry.file_name().to_string_lossy().starts_with("gpiochip"))
            .filter_map(|entry| {
                let path = entry.path();
                let base = read_trimmed(&path.join("base")).ok()?.parse().ok()?;
                let label = read_trimmed(&path.join("label")).unwrap_or_default();
                Some(GpioChipInfo { path, base, label })
            })
            .collect();
        chips.sort_by_key(|chip| chip.base);
        chips
    }
}

impl ChipBaseStrategy for DetectedBase {
    fn base(&self, gpio_root: &Path) -> Option<u32> {
        let chips = Self::chips(gpio_root);

        let detected = chips
            .iter()
            .find(|chip| PRIMARY_CONTROLLER_LABELS.contains(&chip.label.as_str()))
            .or_else(|| chips.iter().find(|chip| Some(chip.base) == self.fallback));

        match detected {
            Some(chip) => {
                debug!(
                    "Primary GPIO controller base {} (from {}, label: {})",
                    chip.base,
                    chip.path.display(),
                    chip.label
                );
                Some(chip.base)
            }
            None => {
                if let Some(base) = self.fallback {
                    warn!("Could not detect GPIO controller base, assuming {base}");
                }
                self.fallback
            }
        }
    }
}
