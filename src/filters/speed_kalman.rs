//! Scalar Kalman filter over forward speed.
//!
//! Predict integrates projected horizontal acceleration at sample rate;
//! update blends in external speed fixes whenever they arrive. Process noise
//! grows while the filter runs without a recent fix, and a reliable fix
//! resets it.

use serde::{Deserialize, Serialize};

use crate::config::KalmanConfig;

/// Floor for P and R. Neither can reach zero from the update equations with
/// sane config, but a degenerate config must not divide by zero.
const NOISE_EPSILON: f64 = 1e-9;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FilterState {
    /// Speed estimate x (m/s), never negative.
    pub speed: f64,
    /// Estimate covariance P, always positive.
    pub covariance: f64,
    /// Current process noise Q.
    pub process_noise: f64,
    /// Timestamp of the last applied fix.
    pub last_update: Option<f64>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RejectReason {
    AccuracyOutOfRange,
    NonFiniteSpeed,
    InvalidTimestamp,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum UpdateOutcome {
    Applied {
        gain: f64,
        measurement_noise: f64,
        innovation: f64,
        /// Q was reset to baseline by a reliable fix.
        process_noise_reset: bool,
    },
    Rejected(RejectReason),
}

pub struct SpeedKalman {
    config: KalmanConfig,
    state: FilterState,
    predict_count: u64,
    update_count: u64,
}

impl SpeedKalman {
    pub fn new(config: KalmanConfig) -> Self {
        let state = Self::initial_state(&config);
        Self {
            config,
            state,
            predict_count: 0,
            update_count: 0,
        }
    }

    fn initial_state(config: &KalmanConfig) -> FilterState {
        FilterState {
            speed: 0.0,
            covariance: config.initial_covariance.max(NOISE_EPSILON),
            process_noise: config.process_noise.max(0.0),
            last_update: None,
        }
    }

    /// Time-propagation: `x += a * dt`, `P += Q`, then Q grows if the filter
    /// has not seen a fix within `staleness_secs` of `timestamp`.
    pub fn predict(&mut self, acceleration: f64, dt: f64, timestamp: f64) {
        let dt = if dt.is_finite() && dt > 0.0 { dt } else { 0.0 };
        let acceleration = if acceleration.is_finite() { acceleration } else { 0.0 };

        self.state.speed = (self.state.speed + acceleration * dt).max(0.0);
        self.state.covariance = (self.state.covariance + self.state.process_noise).max(NOISE_EPSILON);

        if self.is_stale(timestamp) {
            self.state.process_noise += self.config.process_noise_growth;
        }
        self.predict_count += 1;
    }

    fn is_stale(&self, now: f64) -> bool {
        match self.state.last_update {
            None => true,
            Some(ts) => now - ts > self.config.staleness_secs,
        }
    }

    /// Measurement noise for a fix of the given accuracy, clamped to
    /// `[min_measurement_noise, max_measurement_noise]`.
    pub fn measurement_noise(&self, horizontal_accuracy: f64) -> f64 {
        let scaled =
            self.config.gps_base_noise * (horizontal_accuracy / self.config.reference_accuracy);
        let r = if scaled.is_nan() {
            self.config.max_measurement_noise
        } else {
            scaled
        };
        r.max(self.config.min_measurement_noise)
            .min(self.config.max_measurement_noise)
            .max(NOISE_EPSILON)
    }

    pub fn update(&mut self, speed: f64, horizontal_accuracy: f64, timestamp: f64) -> UpdateOutcome {
        if !horizontal_accuracy.is_finite()
            || horizontal_accuracy < 0.0
            || horizontal_accuracy > self.config.max_accuracy
        {
            return UpdateOutcome::Rejected(RejectReason::AccuracyOutOfRange);
        }
        if !speed.is_finite() {
            return UpdateOutcome::Rejected(RejectReason::NonFiniteSpeed);
        }
        if !timestamp.is_finite() {
            return UpdateOutcome::Rejected(RejectReason::InvalidTimestamp);
        }
        let measurement = speed.max(0.0);

        let r = self.measurement_noise(horizontal_accuracy);
        let p = self.state.covariance;
        let gain = p / (p + r);
        let innovation = measurement - self.state.speed;

        self.state.speed = (self.state.speed + gain * innovation).max(0.0);
        self.state.covariance = (p * (1.0 - gain)).max(NOISE_EPSILON);

        let process_noise_reset = horizontal_accuracy < self.config.reliable_accuracy;
        if process_noise_reset {
            self.state.process_noise = self.config.process_noise;
        }
        self.state.last_update = Some(timestamp);
        self.update_count += 1;

        UpdateOutcome::Applied {
            gain,
            measurement_noise: r,
            innovation,
            process_noise_reset,
        }
    }

    /// Multiplies the speed by `factor` (clamped to [0, 1]).
    pub fn dampen(&mut self, factor: f64) {
        let factor = if factor.is_nan() { 1.0 } else { factor.clamp(0.0, 1.0) };
        self.state.speed *= factor;
    }

    /// Zeroes the speed only; P, Q and the staleness clock are untouched.
    pub fn reset_speed(&mut self) {
        self.state.speed = 0.0;
    }

    /// Back to the initial x, P, Q and staleness clock.
    pub fn reset(&mut self) {
        self.state = Self::initial_state(&self.config);
        self.predict_count = 0;
        self.update_count = 0;
    }

    pub fn state(&self) -> FilterState {
        self.state
    }

    pub fn speed(&self) -> f64 {
        self.state.speed
    }

    pub fn predict_count(&self) -> u64 {
        self.predict_count
    }

    pub fn update_count(&self) -> u64 {
        self.update_count
    }

    #[cfg(test)]
    fn set_state(&mut self, state: FilterState) {
        self.state = state;
    }
}
