//! Pedaling cadence from fused speed and the selected gear.

use crate::config::CadenceConfig;

/// Gear ratios indexed by `gear - 1`. Entries that failed to parse stay in
/// place as `None` so later gears keep their numbers.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GearTable {
    ratios: Vec<Option<f64>>,
}

impl GearTable {
    pub fn parse<S: AsRef<str>>(entries: &[S]) -> Self {
        let ratios = entries
            .iter()
            .map(|entry| {
                entry
                    .as_ref()
                    .trim()
                    .parse::<f64>()
                    .ok()
                    .filter(|ratio| ratio.is_finite() && *ratio > 0.0)
            })
            .collect();
        Self { ratios }
    }

    pub fn from_ratios(ratios: &[f64]) -> Self {
        Self {
            ratios: ratios
                .iter()
                .map(|r| Some(*r).filter(|r| r.is_finite() && *r > 0.0))
                .collect(),
        }
    }

    /// Ratio for a 1-based gear number.
    pub fn ratio(&self, gear: u32) -> Option<f64> {
        let index = (gear as usize).checked_sub(1)?;
        self.ratios.get(index).copied().flatten()
    }

    pub fn len(&self) -> usize {
        self.ratios.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ratios.is_empty()
    }

    pub fn invalid_entries(&self) -> usize {
        self.ratios.iter().filter(|r| r.is_none()).count()
    }
}

/// Revolutions per minute, `Some(0.0)` when freewheeling (gear 0) and `None`
/// when the gear or wheel configuration cannot produce a value.
pub fn cadence(speed: f64, gear: u32, gears: &GearTable, wheel_circumference: f64) -> Option<f64> {
    if gear == 0 {
        return Some(0.0);
    }
    if !(wheel_circumference.is_finite() && wheel_circumference > 0.0) {
        return None;
    }
    let ratio = gears.ratio(gear)?;
    let speed = if speed.is_finite() { speed.max(0.0) } else { return None };
    Some((speed / wheel_circumference) * ratio * 60.0)
}

/// Parsed cadence configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct CadenceModel {
    gears: GearTable,
    wheel_circumference: f64,
}

impl CadenceModel {
    pub fn new(config: &CadenceConfig) -> Self {
        Self {
            gears: GearTable::parse(&config.gear_ratios),
            wheel_circumference: config.wheel_circumference,
        }
    }

    pub fn cadence(&self, speed: f64, gear: u32) -> Option<f64> {
        cadence(speed, gear, &self.gears, self.wheel_circumference)
    }

    pub fn gears(&self) -> &GearTable {
        &self.gears
    }

    pub fn wheel_circumference(&self) -> f64 {
        self.wheel_circumference
    }
}
