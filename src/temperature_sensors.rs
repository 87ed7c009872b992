//! Concrete temperature sources.

pub mod thermal_zone;
