use serde::{Deserialize, Serialize};

use crate::projection::ProjectedMotion;
use crate::types::{to_tuple, RideContext, Stance, Terrain};

/// One output row per motion sample that made it past calibration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SampleRecord {
    pub timestamp: f64,
    /// m/s
    pub speed: f64,
    /// RPM; `None` when the gear configuration cannot produce one.
    pub cadence: Option<f64>,
    pub gear: u32,
    pub terrain: Terrain,
    pub stance: Stance,
    pub accel: (f64, f64, f64),
    pub rotation_rate: (f64, f64, f64),
    pub horizontal_accel: f64,
    pub confidence: f64,
}

impl SampleRecord {
    pub fn new(
        timestamp: f64,
        speed: f64,
        cadence: Option<f64>,
        context: &RideContext,
        motion: &ProjectedMotion,
    ) -> Self {
        Self {
            timestamp,
            speed,
            cadence,
            gear: context.gear,
            terrain: context.terrain,
            stance: context.stance,
            accel: to_tuple(&motion.corrected_accel),
            rotation_rate: to_tuple(&motion.corrected_rotation),
            horizontal_accel: motion.horizontal,
            confidence: motion.confidence,
        }
    }
}
