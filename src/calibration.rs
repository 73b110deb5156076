//! Periodic zero-motion bias calibration.
//!
//! Sensor offsets drift with temperature and mounting, so a single warm-up
//! average is not enough for long rides. The calibrator re-opens a sampling
//! window every `recalibration_interval_secs`, averages the raw readings over
//! `sampling_duration_secs`, and swaps the result in as one value.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::config::CalibrationConfig;
use crate::types::{AccelVec, GyroVec, MotionSample};

/// Upper bound on samples reserved up front for one window. Longer windows
/// still work, the buffer just grows.
const MAX_PREALLOCATED_SAMPLES: f64 = 4096.0;

/// Per-axis at-rest offsets. Either fully default (invalid) or fully computed.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BiasEstimate {
    pub accel: AccelVec,
    pub gyro: GyroVec,
    pub computed_at: f64,
    pub sample_count: usize,
    pub valid: bool,
}

impl Default for BiasEstimate {
    fn default() -> Self {
        Self {
            accel: Vector3::zeros(),
            gyro: Vector3::zeros(),
            computed_at: 0.0,
            sample_count: 0,
            valid: false,
        }
    }
}

/// Result of feeding one sample to the calibrator.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CalibrationStatus {
    /// A new window was opened by this sample; withhold output.
    Started { at: f64 },
    /// Sample consumed by an open window; withhold output.
    Calibrating,
    /// This sample closed the window and a new estimate is active; withhold output.
    Completed(BiasEstimate),
    /// No window open; the active estimate may be used.
    Ready,
}

impl CalibrationStatus {
    pub fn is_ready(&self) -> bool {
        matches!(self, CalibrationStatus::Ready)
    }
}

struct CalibrationWindow {
    started_at: f64,
    accel: Vec<AccelVec>,
    gyro: Vec<GyroVec>,
}

impl CalibrationWindow {
    fn open(started_at: f64, capacity: usize) -> Self {
        Self {
            started_at,
            accel: Vec::with_capacity(capacity),
            gyro: Vec::with_capacity(capacity),
        }
    }

    /// Non-finite readings are skipped; one of them would poison every axis mean.
    fn push(&mut self, sample: &MotionSample) {
        let (accel, gyro) = (sample.accel(), sample.rotation_rate());
        if accel.iter().chain(gyro.iter()).all(|v| v.is_finite()) {
            self.accel.push(accel);
            self.gyro.push(gyro);
        }
    }

    fn mean(samples: &[Vector3<f64>]) -> Vector3<f64> {
        let sum = samples.iter().fold(Vector3::zeros(), |acc, v| acc + v);
        sum / samples.len() as f64
    }

    /// `None` when nothing was buffered.
    fn finish(&self, at: f64) -> Option<BiasEstimate> {
        if self.accel.is_empty() || self.gyro.is_empty() {
            return None;
        }
        Some(BiasEstimate {
            accel: Self::mean(&self.accel),
            gyro: Self::mean(&self.gyro),
            computed_at: at,
            sample_count: self.accel.len(),
            valid: true,
        })
    }
}

pub struct BiasCalibrator {
    config: CalibrationConfig,
    active: BiasEstimate,
    window: Option<CalibrationWindow>,
    window_capacity: usize,
}

impl BiasCalibrator {
    pub fn new(config: CalibrationConfig, sample_rate_hz: f64) -> Self {
        let expected = (config.sampling_duration_secs * sample_rate_hz).ceil();
        let window_capacity = if expected.is_finite() && expected > 0.0 {
            (expected.min(MAX_PREALLOCATED_SAMPLES) as usize).saturating_add(1)
        } else {
            0
        };
        Self {
            config,
            active: BiasEstimate::default(),
            window: None,
            window_capacity,
        }
    }

    /// Feeds one raw sample. Output for the sample must be withheld unless
    /// the returned status is `Ready`.
    pub fn ingest(&mut self, sample: &MotionSample) -> CalibrationStatus {
        let mut status = CalibrationStatus::Calibrating;

        if self.window.is_none() {
            if !self.is_due(sample.timestamp) {
                return CalibrationStatus::Ready;
            }
            self.window = Some(CalibrationWindow::open(sample.timestamp, self.window_capacity));
            status = CalibrationStatus::Started { at: sample.timestamp };
        }

        let Some(window) = self.window.as_mut() else {
            return CalibrationStatus::Ready;
        };
        window.push(sample);

        if sample.timestamp - window.started_at >= self.config.sampling_duration_secs {
            if let Some(estimate) = window.finish(sample.timestamp) {
                self.active = estimate;
                status = CalibrationStatus::Completed(estimate);
            }
            self.window = None;
        }

        status
    }

    fn is_due(&self, now: f64) -> bool {
        !self.active.valid
            || now - self.active.computed_at > self.config.recalibration_interval_secs
    }

    pub fn active(&self) -> &BiasEstimate {
        &self.active
    }

    pub fn has_estimate(&self) -> bool {
        self.active.valid
    }

    pub fn is_calibrating(&self) -> bool {
        self.window.is_some()
    }

    /// Samples buffered in the open window, 0 when idle.
    pub fn buffered(&self) -> usize {
        self.window.as_ref().map(|w| w.accel.len()).unwrap_or(0)
    }

    /// Session start: forget the estimate and any open window.
    pub fn reset(&mut self) {
        self.active = BiasEstimate::default();
        self.window = None;
    }
}
