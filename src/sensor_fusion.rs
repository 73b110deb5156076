// sensor_fusion.rs: Pure computation layer for speed and cadence
//
// Everything in this module is independent of:
//   - tokio / async runtime
//   - where samples come from (phone sensors, replay logs, simulation)
//   - what happens to records afterwards (recording, export, UI)
//
// It takes motion samples and speed fixes in, produces records and events
// out. The worker module serializes both producer streams onto one
// instance of `SpeedFusion`.

use serde::Serialize;

use crate::cadence::CadenceModel;
use crate::calibration::{BiasCalibrator, BiasEstimate, CalibrationStatus};
use crate::config::{CadenceConfig, EstimatorConfig};
use crate::confidence::ConfidenceDecay;
use crate::filters::{FilterState, RejectReason, SpeedKalman, UpdateOutcome};
use crate::projection::OrientationProjector;
use crate::record::SampleRecord;
use crate::types::{MotionSample, PositionFix, RideContext};

// ─── Events ──────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq)]
pub enum FusionEvent {
    CalibrationStarted { at: f64 },
    CalibrationCompleted { bias: BiasEstimate },
    FixApplied { speed: f64, accuracy: f64, gain: f64, measurement_noise: f64 },
    FixRejected { speed: f64, accuracy: f64, reason: RejectReason },
    ProcessNoiseReset,
    StillnessReset { still_for_secs: f64, speed_before: f64 },
    SampleOutOfOrder { timestamp: f64, previous: f64 },
    InvalidTimestamp { timestamp: f64 },
    /// Non-finite acceleration or rotation rate; the sample was dropped.
    InvalidReading { timestamp: f64 },
    SampleGap { gap_secs: f64 },
}

// ─── Outputs ─────────────────────────────────────────────────────────────────

/// Result of one motion sample. `record` is `None` while calibrating or
/// when the sample was rejected.
#[derive(Clone, Debug, Default)]
pub struct MotionStep {
    pub record: Option<SampleRecord>,
    pub events: Vec<FusionEvent>,
}

/// Read-only view of the estimator for consumers.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FusionSnapshot {
    pub timestamp: Option<f64>,
    pub speed: f64,
    pub cadence: Option<f64>,
    pub filter: FilterState,
    pub bias: BiasEstimate,
    pub calibrating: bool,
    pub context: RideContext,
    pub motion_samples: u64,
    pub records: u64,
    pub fixes_applied: u64,
    pub fixes_rejected: u64,
    pub stillness_resets: u64,
}

// ─── The main fusion struct ──────────────────────────────────────────────────

pub struct SpeedFusion {
    config: EstimatorConfig,

    calibrator: BiasCalibrator,
    projector: OrientationProjector,
    kalman: SpeedKalman,
    decay: ConfidenceDecay,
    cadence: CadenceModel,

    context: RideContext,

    // Timestamp validation
    last_motion_ts: Option<f64>,

    // Counters
    motion_samples: u64,
    records: u64,
    fixes_applied: u64,
    fixes_rejected: u64,
    stillness_resets: u64,
}

impl SpeedFusion {
    pub fn new(config: EstimatorConfig) -> Self {
        Self {
            calibrator: BiasCalibrator::new(config.calibration.clone(), config.sample_rate_hz),
            projector: OrientationProjector::new(config.projection.clone()),
            kalman: SpeedKalman::new(config.kalman.clone()),
            decay: ConfidenceDecay::new(config.decay.clone()),
            cadence: CadenceModel::new(&config.cadence),
            context: RideContext::default(),
            last_motion_ts: None,
            motion_samples: 0,
            records: 0,
            fixes_applied: 0,
            fixes_rejected: 0,
            stillness_resets: 0,
            config,
        }
    }

    // ── Sensor feeds ─────────────────────────────────────────────────────

    /// Feed one motion sample (primary 50 Hz tick).
    pub fn feed_motion(&mut self, sample: &MotionSample) -> MotionStep {
        let mut step = MotionStep::default();

        // Timestamp validation
        if !sample.timestamp.is_finite() {
            step.events.push(FusionEvent::InvalidTimestamp { timestamp: sample.timestamp });
            return step;
        }
        let readings = sample.accel().iter().chain(sample.rotation_rate().iter()).all(|v| v.is_finite());
        if !readings {
            step.events.push(FusionEvent::InvalidReading { timestamp: sample.timestamp });
            return step;
        }
        let dt = match self.last_motion_ts {
            None => 0.0,
            Some(prev) if sample.timestamp < prev => {
                step.events.push(FusionEvent::SampleOutOfOrder {
                    timestamp: sample.timestamp,
                    previous: prev,
                });
                return step;
            }
            Some(prev) => {
                let gap = sample.timestamp - prev;
                if gap > self.config.max_sample_gap_secs {
                    step.events.push(FusionEvent::SampleGap { gap_secs: gap });
                    0.0
                } else {
                    gap
                }
            }
        };
        self.last_motion_ts = Some(sample.timestamp);
        self.motion_samples += 1;

        // Bias calibration
        match self.calibrator.ingest(sample) {
            CalibrationStatus::Ready => {}
            CalibrationStatus::Started { at } => {
                step.events.push(FusionEvent::CalibrationStarted { at });
                return step;
            }
            CalibrationStatus::Calibrating => return step,
            CalibrationStatus::Completed(bias) => {
                // Window samples never reached the decay timer; stillness
                // is measured afresh from the first sample after it.
                self.decay.reset();
                step.events.push(FusionEvent::CalibrationCompleted { bias });
                return step;
            }
        }

        // Projection + prediction
        let motion = self.projector.project(sample, self.calibrator.active());
        self.kalman.predict(motion.horizontal, dt, sample.timestamp);

        // Confidence decay
        let action = self.decay.observe(motion.confidence, sample.timestamp);
        self.kalman.dampen(action.damping_factor);
        if action.force_stop {
            let speed_before = self.kalman.speed();
            self.kalman.reset_speed();
            self.stillness_resets += 1;
            step.events.push(FusionEvent::StillnessReset {
                still_for_secs: action.low_for_secs,
                speed_before,
            });
        }

        let speed = self.kalman.speed();
        let cadence = self.cadence.cadence(speed, self.context.gear);
        self.records += 1;
        step.record = Some(SampleRecord::new(sample.timestamp, speed, cadence, &self.context, &motion));
        step
    }

    /// Feed one external speed fix. Applied immediately; the next predict sees it.
    pub fn feed_fix(&mut self, fix: &PositionFix) -> Vec<FusionEvent> {
        let mut events = Vec::new();

        match self.kalman.update(fix.speed, fix.horizontal_accuracy, fix.timestamp) {
            UpdateOutcome::Applied { gain, measurement_noise, process_noise_reset, .. } => {
                self.fixes_applied += 1;
                events.push(FusionEvent::FixApplied {
                    speed: fix.speed.max(0.0),
                    accuracy: fix.horizontal_accuracy,
                    gain,
                    measurement_noise,
                });
                if process_noise_reset {
                    events.push(FusionEvent::ProcessNoiseReset);
                }
            }
            UpdateOutcome::Rejected(reason) => {
                self.fixes_rejected += 1;
                events.push(FusionEvent::FixRejected {
                    speed: fix.speed,
                    accuracy: fix.horizontal_accuracy,
                    reason,
                });
            }
        }

        events
    }

    pub fn set_ride_context(&mut self, context: RideContext) {
        self.context = context;
    }

    pub fn set_cadence_config(&mut self, config: CadenceConfig) {
        self.cadence = CadenceModel::new(&config);
        self.config.cadence = config;
    }

    /// Session boundary: filter, decay timer, bias and sample clock back to
    /// their initial state. Ride context and configuration are kept.
    pub fn reset(&mut self) {
        self.kalman.reset();
        self.decay.reset();
        self.calibrator.reset();
        self.last_motion_ts = None;
        self.motion_samples = 0;
        self.records = 0;
        self.fixes_applied = 0;
        self.fixes_rejected = 0;
        self.stillness_resets = 0;
    }

    // ── Queries ──────────────────────────────────────────────────────────

    pub fn snapshot(&self) -> FusionSnapshot {
        FusionSnapshot {
            timestamp: self.last_motion_ts,
            speed: self.speed(),
            cadence: self.cadence(),
            filter: self.kalman.state(),
            bias: *self.calibrator.active(),
            calibrating: self.calibrator.is_calibrating(),
            context: self.context,
            motion_samples: self.motion_samples,
            records: self.records,
            fixes_applied: self.fixes_applied,
            fixes_rejected: self.fixes_rejected,
            stillness_resets: self.stillness_resets,
        }
    }

    pub fn speed(&self) -> f64 {
        self.kalman.speed()
    }

    pub fn cadence(&self) -> Option<f64> {
        self.cadence.cadence(self.speed(), self.context.gear)
    }

    pub fn config(&self) -> &EstimatorConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const DT: f64 = 0.02;

    fn still(t: f64) -> MotionSample {
        MotionSample::level(t, (0.0, 0.0, 0.0), (0.0, 0.0, 0.0))
    }

    /// Runs the first calibration window on zero-motion samples and returns
    /// the timestamp of the last sample it consumed.
    fn calibrate(fusion: &mut SpeedFusion) -> f64 {
        let mut t = 0.0;
        loop {
            let step = fusion.feed_motion(&still(t));
            assert!(step.record.is_none());
            if fusion.snapshot().bias.valid {
                return t;
            }
            t += DT;
        }
    }

    #[test]
    fn test_calibration_withholds_records() {
        let mut fusion = SpeedFusion::new(EstimatorConfig::default());
        let mut withheld = 0;
        let mut events = Vec::new();
        let mut t = 0.0;
        loop {
            let step = fusion.feed_motion(&MotionSample::level(t, (0.1, -0.2, 0.05), (0.01, 0.0, 0.0)));
            events.extend(step.events);
            if step.record.is_some() {
                break;
            }
            withheld += 1;
            t += DT;
        }
        assert!(withheld >= 100, "withheld only {withheld}");
        assert!(matches!(events.first(), Some(FusionEvent::CalibrationStarted { at }) if *at == 0.0));
        let bias = events.iter().find_map(|e| match e {
            FusionEvent::CalibrationCompleted { bias } => Some(*bias),
            _ => None,
        });
        let bias = bias.expect("calibration should complete");
        assert_relative_eq!(bias.accel.x, 0.1, epsilon = 1e-12);
        assert_relative_eq!(bias.accel.y, -0.2, epsilon = 1e-12);
        assert_relative_eq!(bias.gyro.x, 0.01, epsilon = 1e-12);

        // Constant bias fully removed: first record sees no motion.
        let record = fusion.feed_motion(&MotionSample::level(t + DT, (0.1, -0.2, 0.05), (0.01, 0.0, 0.0)));
        let record = record.record.unwrap();
        assert_relative_eq!(record.horizontal_accel, 0.0, epsilon = 1e-12);
        assert_relative_eq!(record.rotation_rate.0, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_acceleration_integrates_into_speed() {
        let mut fusion = SpeedFusion::new(EstimatorConfig::default());
        let mut t = calibrate(&mut fusion) + DT;
        for _ in 0..50 {
            fusion.feed_motion(&MotionSample::level(t, (1.0, 0.0, 0.0), (0.0, 0.0, 0.0)));
            t += DT;
        }
        // ~1 s at 1 m/s² with confidence 1 (no damping).
        assert_relative_eq!(fusion.speed(), 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_fix_visible_to_next_predict() {
        let mut fusion = SpeedFusion::new(EstimatorConfig::default());
        let t = calibrate(&mut fusion);
        let events = fusion.feed_fix(&PositionFix { timestamp: t, speed: 6.0, horizontal_accuracy: 3.0 });
        assert!(matches!(events[0], FusionEvent::FixApplied { .. }));
        assert!(events.contains(&FusionEvent::ProcessNoiseReset));
        let after_fix = fusion.speed();
        assert!(after_fix > 0.0);

        let step = fusion.feed_motion(&MotionSample::level(t, (0.5, 0.0, 0.0), (0.0, 0.0, 0.0)));
        let record = step.record.unwrap();
        // Same timestamp as the last calibration sample: dt = 0, only damping
        // at confidence 0.5 applies.
        assert_relative_eq!(record.speed, after_fix * 0.995, epsilon = 1e-12);
    }

    #[test]
    fn test_rejected_fix_leaves_state() {
        let mut fusion = SpeedFusion::new(EstimatorConfig::default());
        let before = fusion.snapshot().filter;
        let events = fusion.feed_fix(&PositionFix { timestamp: 1.0, speed: 6.0, horizontal_accuracy: 250.0 });
        assert!(matches!(
            events[0],
            FusionEvent::FixRejected { reason: RejectReason::AccuracyOutOfRange, .. }
        ));
        assert_eq!(fusion.snapshot().filter, before);
        assert_eq!(fusion.snapshot().fixes_rejected, 1);
    }

    #[test]
    fn test_stillness_forces_speed_to_zero() {
        let mut fusion = SpeedFusion::new(EstimatorConfig::default());
        let mut t = calibrate(&mut fusion) + DT;
        fusion.feed_fix(&PositionFix { timestamp: t, speed: 4.0, horizontal_accuracy: 2.0 });
        assert!(fusion.speed() > 1.0);

        let mut reset_at = None;
        let start = t;
        while t < start + 6.0 {
            let step = fusion.feed_motion(&still(t));
            if step.events.iter().any(|e| matches!(e, FusionEvent::StillnessReset { .. })) {
                reset_at = Some(t);
                assert_eq!(step.record.unwrap().speed, 0.0);
                break;
            }
            t += DT;
        }
        let reset_at = reset_at.expect("stillness reset should fire");
        assert!(reset_at - start >= 5.0 - 1e-9 && reset_at - start < 5.0 + 2.0 * DT);
        assert_eq!(fusion.snapshot().stillness_resets, 1);
        // Covariance is not reset by a stillness stop.
        assert!(fusion.snapshot().filter.covariance > 0.0);
    }

    #[test]
    fn test_non_finite_reading_dropped() {
        let mut fusion = SpeedFusion::new(EstimatorConfig::default());
        let mut bad = still(0.2);
        bad.accel_x = f64::NAN;
        let mut t = 0.0;
        for i in 0..=100 {
            t = i as f64 * DT;
            let step = if i == 10 { fusion.feed_motion(&bad) } else { fusion.feed_motion(&still(t)) };
            if i == 10 {
                assert_eq!(step.events, vec![FusionEvent::InvalidReading { timestamp: 0.2 }]);
            }
        }
        let bias = fusion.snapshot().bias;
        assert!(bias.valid);
        assert!(bias.accel.iter().chain(bias.gyro.iter()).all(|v| v.is_finite()));
        assert_eq!(fusion.snapshot().motion_samples, 100);

        for _ in 0..100 {
            t += DT;
            let step = fusion.feed_motion(&MotionSample::level(t, (1.0, 0.0, 0.0), (0.0, 0.0, 0.0)));
            let record = step.record.unwrap();
            assert!(record.accel.0.is_finite());
        }
        // ~2 s at 1 m/s² (first post-window sample integrates too).
        assert!(fusion.speed() > 1.9, "speed {}", fusion.speed());
    }

    #[test]
    fn test_recalibration_restarts_stillness_timer() {
        let mut config = EstimatorConfig::default();
        config.calibration.recalibration_interval_secs = 6.0;
        config.decay.stillness_secs = 8.0;
        let mut fusion = SpeedFusion::new(config);
        let start = calibrate(&mut fusion);
        let first_bias_at = fusion.snapshot().bias.computed_at;

        // Still from the end of the first window until t = 14. A second window
        // runs around t = 8..10; afterwards stillness counts from zero again.
        let mut i = 1;
        loop {
            let t = start + i as f64 * DT;
            if t > 14.0 {
                break;
            }
            fusion.feed_motion(&still(t));
            i += 1;
        }
        let snap = fusion.snapshot();
        assert!(snap.bias.computed_at > first_bias_at);
        assert_eq!(snap.stillness_resets, 0);
    }

    #[test]
    fn test_out_of_order_sample_rejected() {
        let mut fusion = SpeedFusion::new(EstimatorConfig::default());
        let t = calibrate(&mut fusion) + DT;
        fusion.feed_motion(&still(t));
        let step = fusion.feed_motion(&still(t - 1.0));
        assert!(step.record.is_none());
        assert!(matches!(step.events[0], FusionEvent::SampleOutOfOrder { .. }));
    }

    #[test]
    fn test_gap_not_integrated() {
        let mut fusion = SpeedFusion::new(EstimatorConfig::default());
        let t = calibrate(&mut fusion) + DT;
        fusion.feed_motion(&still(t));
        let step = fusion.feed_motion(&MotionSample::level(t + 3.0, (2.0, 0.0, 0.0), (0.0, 0.0, 0.0)));
        assert!(matches!(step.events[0], FusionEvent::SampleGap { .. }));
        assert_eq!(step.record.unwrap().speed, 0.0);
    }

    #[test]
    fn test_cadence_follows_gear() {
        let mut fusion = SpeedFusion::new(EstimatorConfig::default());
        fusion.set_cadence_config(CadenceConfig {
            gear_ratios: vec!["1.0".into(), "1.5".into(), "2.0".into()],
            wheel_circumference: 2.1,
        });
        let t = calibrate(&mut fusion);
        fusion.feed_fix(&PositionFix { timestamp: t, speed: 3.0, horizontal_accuracy: 1.0 });

        fusion.set_ride_context(RideContext { gear: 0, ..RideContext::default() });
        assert_eq!(fusion.cadence(), Some(0.0));

        fusion.set_ride_context(RideContext { gear: 3, ..RideContext::default() });
        let expected = fusion.speed() / 2.1 * 2.0 * 60.0;
        assert_relative_eq!(fusion.cadence().unwrap(), expected, epsilon = 1e-9);

        fusion.set_ride_context(RideContext { gear: 7, ..RideContext::default() });
        assert_eq!(fusion.cadence(), None);
    }

    #[test]
    fn test_reset_returns_to_initial_state() {
        let mut fusion = SpeedFusion::new(EstimatorConfig::default());
        let t = calibrate(&mut fusion);
        fusion.feed_fix(&PositionFix { timestamp: t, speed: 5.0, horizontal_accuracy: 2.0 });
        fusion.reset();
        let snap = fusion.snapshot();
        assert_eq!(snap.speed, 0.0);
        assert_eq!(snap.filter.last_update, None);
        assert!(!snap.bias.valid);
        assert_eq!(snap.timestamp, None);
        // Next session calibrates again.
        assert!(fusion.feed_motion(&still(100.0)).record.is_none());
    }
}
