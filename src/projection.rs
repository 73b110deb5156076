//! Body-frame to horizontal-plane projection.
//!
//! Raw body-frame acceleration mixes tilt and gravity leakage with real
//! forward motion. Rotating the bias-corrected vector with the device
//! attitude and keeping only the two horizontal axes gives the quantity the
//! speed filter integrates.

use nalgebra::Matrix3;

use crate::calibration::BiasEstimate;
use crate::config::ProjectionConfig;
use crate::types::{AccelVec, GyroVec, MotionSample};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProjectedMotion {
    /// Bias-corrected body-frame acceleration.
    pub corrected_accel: AccelVec,
    /// Bias-corrected body-frame rotation rate.
    pub corrected_rotation: GyroVec,
    /// Corrected acceleration expressed in the reference frame.
    pub reference_accel: AccelVec,
    /// Planar magnitude of `reference_accel`, scaled by `accel_scale`. Never negative.
    pub horizontal: f64,
    /// Movement confidence in [0, 1].
    pub confidence: f64,
}

pub struct OrientationProjector {
    config: ProjectionConfig,
}

impl OrientationProjector {
    pub fn new(config: ProjectionConfig) -> Self {
        Self { config }
    }

    pub fn project(&self, sample: &MotionSample, bias: &BiasEstimate) -> ProjectedMotion {
        let corrected_accel = sample.accel() - bias.accel;
        let corrected_rotation = sample.rotation_rate() - bias.gyro;

        let mut attitude = sample.attitude_matrix();
        if attitude.iter().any(|v| !v.is_finite()) {
            attitude = Matrix3::identity();
        }
        let reference_accel = attitude * corrected_accel;

        let planar = reference_accel.x.hypot(reference_accel.y) * self.config.accel_scale;
        let horizontal = if planar.is_finite() { planar.max(0.0) } else { 0.0 };

        ProjectedMotion {
            corrected_accel,
            corrected_rotation,
            reference_accel,
            horizontal,
            confidence: self.confidence(horizontal),
        }
    }

    /// `clamp(magnitude / reference_scale, 0, 1)`.
    pub fn confidence(&self, magnitude: f64) -> f64 {
        let ratio = magnitude / self.config.confidence_reference_scale;
        if ratio.is_nan() {
            return 0.0;
        }
        ratio.clamp(0.0, 1.0)
    }
}
