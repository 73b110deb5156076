// config.rs: every tunable constant of the speed/cadence pipeline
//
// Historical builds disagreed on several of these (recalibration every 10 s
// vs 30 s, initial covariance, staleness-driven Q growth on/off). They all
// live here as data; the algorithms never hardcode them.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{ConfigError, ConfigResult};

/// A calibration window withholds output for its whole duration.
pub const MAX_SAMPLING_DURATION_SECS: f64 = 600.0;

// ─── Bias calibration ────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Seconds between the end of one calibration and the start of the next.
    pub recalibration_interval_secs: f64,
    /// Length of one sampling window in seconds.
    pub sampling_duration_secs: f64,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            recalibration_interval_secs: 30.0,
            sampling_duration_secs: 2.0,
        }
    }
}

// ─── Projection / confidence ─────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectionConfig {
    /// Multiplier applied to projected acceleration (9.80665 for samples in g).
    pub accel_scale: f64,
    /// Horizontal acceleration that maps to full movement confidence.
    pub confidence_reference_scale: f64,
}

impl Default for ProjectionConfig {
    fn default() -> Self {
        Self {
            accel_scale: 1.0,
            confidence_reference_scale: 1.0,
        }
    }
}

// ─── Scalar speed Kalman filter ──────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KalmanConfig {
    pub initial_covariance: f64,
    /// Baseline process noise Q.
    pub process_noise: f64,
    /// Added to Q on every predict while running without a recent fix.
    pub process_noise_growth: f64,
    /// Seconds without a fix before Q starts growing.
    pub staleness_secs: f64,
    /// Measurement noise at the reference accuracy.
    pub gps_base_noise: f64,
    pub reference_accuracy: f64,
    pub min_measurement_noise: f64,
    pub max_measurement_noise: f64,
    /// Fixes better than this reset Q to baseline.
    pub reliable_accuracy: f64,
    /// Fixes worse than this are discarded.
    pub max_accuracy: f64,
}

impl Default for KalmanConfig {
    fn default() -> Self {
        Self {
            initial_covariance: 1.0,
            process_noise: 0.1,
            process_noise_growth: 0.01,
            staleness_secs: 1.0,
            gps_base_noise: 0.05,
            reference_accuracy: 5.0,
            min_measurement_noise: 1.0,
            max_measurement_noise: 10.0,
            reliable_accuracy: 10.0,
            max_accuracy: 100.0,
        }
    }
}

// ─── Confidence decay ────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecayConfig {
    /// Fraction of speed removed per sample at zero confidence.
    pub damping_constant: f64,
    pub low_confidence_threshold: f64,
    /// Seconds of continuous low confidence before the rider is assumed stopped.
    pub stillness_secs: f64,
}

impl Default for DecayConfig {
    fn default() -> Self {
        Self {
            damping_constant: 0.01,
            low_confidence_threshold: 0.05,
            stillness_secs: 5.0,
        }
    }
}

// ─── Cadence ─────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CadenceConfig {
    /// Index = gear number - 1. Entries that do not parse are tolerated.
    pub gear_ratios: Vec<String>,
    /// Meters.
    pub wheel_circumference: f64,
}

impl Default for CadenceConfig {
    fn default() -> Self {
        Self {
            gear_ratios: ["1.0", "1.5", "2.0", "2.5", "3.0"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            wheel_circumference: 2.1,
        }
    }
}

// ─── Top level ───────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    pub sample_rate_hz: f64,
    /// Motion-sample gaps longer than this are not integrated.
    pub max_sample_gap_secs: f64,
    pub calibration: CalibrationConfig,
    pub projection: ProjectionConfig,
    pub kalman: KalmanConfig,
    pub decay: DecayConfig,
    pub cadence: CadenceConfig,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: 50.0,
            max_sample_gap_secs: 1.0,
            calibration: CalibrationConfig::default(),
            projection: ProjectionConfig::default(),
            kalman: KalmanConfig::default(),
            decay: DecayConfig::default(),
            cadence: CadenceConfig::default(),
        }
    }
}

impl EstimatorConfig {
    /// Loads a JSON config; missing fields keep their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> ConfigResult<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values that would make the filter meaningless. Gear ratios and
    /// wheel circumference are not checked here: the cadence path degrades
    /// to "unavailable" on its own.
    pub fn validate(&self) -> ConfigResult<()> {
        let positive = [
            ("sample_rate_hz", self.sample_rate_hz),
            ("max_sample_gap_secs", self.max_sample_gap_secs),
            ("calibration.sampling_duration_secs", self.calibration.sampling_duration_secs),
            ("projection.accel_scale", self.projection.accel_scale),
            ("projection.confidence_reference_scale", self.projection.confidence_reference_scale),
            ("kalman.initial_covariance", self.kalman.initial_covariance),
            ("kalman.reference_accuracy", self.kalman.reference_accuracy),
            ("kalman.min_measurement_noise", self.kalman.min_measurement_noise),
            ("kalman.max_accuracy", self.kalman.max_accuracy),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::Invalid(format!("{name} must be positive, got {value}")));
            }
        }

        let non_negative = [
            ("calibration.recalibration_interval_secs", self.calibration.recalibration_interval_secs),
            ("kalman.process_noise", self.kalman.process_noise),
            ("kalman.process_noise_growth", self.kalman.process_noise_growth),
            ("kalman.staleness_secs", self.kalman.staleness_secs),
            ("kalman.gps_base_noise", self.kalman.gps_base_noise),
            ("kalman.reliable_accuracy", self.kalman.reliable_accuracy),
            ("decay.low_confidence_threshold", self.decay.low_confidence_threshold),
            ("decay.stillness_secs", self.decay.stillness_secs),
        ];
        for (name, value) in non_negative {
            if !(value.is_finite() && value >= 0.0) {
                return Err(ConfigError::Invalid(format!("{name} must be >= 0, got {value}")));
            }
        }

        if self.calibration.sampling_duration_secs > MAX_SAMPLING_DURATION_SECS {
            return Err(ConfigError::Invalid(format!(
                "calibration.sampling_duration_secs must be at most {MAX_SAMPLING_DURATION_SECS}, got {}",
                self.calibration.sampling_duration_secs
            )));
        }
        if self.kalman.max_measurement_noise < self.kalman.min_measurement_noise {
            return Err(ConfigError::Invalid(format!(
                "kalman.max_measurement_noise ({}) below min_measurement_noise ({})",
                self.kalman.max_measurement_noise, self.kalman.min_measurement_noise
            )));
        }
        if !(0.0..=1.0).contains(&self.decay.damping_constant) {
            return Err(ConfigError::Invalid(format!(
                "decay.damping_constant must be within [0, 1], got {}",
                self.decay.damping_constant
            )));
        }
        Ok(())
    }
}
