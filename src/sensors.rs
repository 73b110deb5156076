//! Simulated motion and fix producers.
//!
//! Stand-ins for the phone's motion and location services: they push typed
//! samples into the estimator channel at the rates real sensors would.
//! Samples are dropped, not queued, when the estimator falls behind.

use std::f64::consts::PI;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc::Sender;
use tokio::time::{interval, Duration};

use crate::types::{MotionSample, PositionFix};
use crate::worker::EstimatorInput;

/// Seconds of standstill before the simulated rider sets off.
const SIM_STANDSTILL_SECS: f64 = 4.0;

pub async fn motion_loop(tx: Sender<EstimatorInput>, rate_hz: f64) {
    let period_ms = (1000.0 / rate_hz.max(1.0)).round().max(1.0) as u64;
    let mut interval = interval(Duration::from_millis(period_ms));
    let start = current_timestamp();
    let mut sample_count = 0u64;

    loop {
        interval.tick().await;
        let sample = simulated_motion(current_timestamp(), start);

        match tx.try_send(EstimatorInput::Motion(sample)) {
            Ok(_) => {
                sample_count += 1;
                if sample_count % 500 == 0 {
                    log::debug!("[motion] {} samples", sample_count);
                }
            }
            Err(TrySendError::Closed(_)) => {
                log::info!("[motion] channel closed after {} samples", sample_count);
                break;
            }
            Err(TrySendError::Full(_)) => {
                // Estimator busy, drop this sample
            }
        }
    }
}

pub async fn fix_loop(tx: Sender<EstimatorInput>) {
    let mut interval = interval(Duration::from_secs(1));
    let start = current_timestamp();
    let mut fix_count = 0u64;

    loop {
        interval.tick().await;
        let fix = simulated_fix(current_timestamp(), start);

        match tx.try_send(EstimatorInput::Fix(fix)) {
            Ok(_) => {
                fix_count += 1;
                log::debug!("[fix] {} fixes", fix_count);
            }
            Err(TrySendError::Closed(_)) => {
                log::info!("[fix] channel closed after {} fixes", fix_count);
                break;
            }
            Err(TrySendError::Full(_)) => {}
        }
    }
}

/// Ride profile: standing still, then a gentle surge around 0.4 m/s² with
/// pedal-stroke ripple, on a device tilted 20° forward.
fn simulated_motion(timestamp: f64, start: f64) -> MotionSample {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let n = COUNTER.fetch_add(1, Ordering::Relaxed) as f64;
    let elapsed = timestamp - start;

    // Fixed sensor offset plus a little noise; this is what calibration removes.
    let noise = (n * 12.9898).sin() * 0.01;
    let (bias_x, bias_y, bias_z) = (0.02, -0.015, 0.01);

    let forward = if elapsed < SIM_STANDSTILL_SECS {
        0.0
    } else {
        let ripple = (elapsed * 2.0 * PI * 1.4).sin() * 0.15;
        0.4 * (elapsed * 0.05).cos().max(0.0) + ripple
    };

    let tilt = 20f64.to_radians();
    let (c, s) = (tilt.cos(), tilt.sin());
    // Body frame sees the forward push split across x and z by the tilt.
    let body_x = forward * c;
    let body_z = -forward * s;

    MotionSample {
        timestamp,
        accel_x: body_x + bias_x + noise,
        accel_y: bias_y + noise * 0.5,
        accel_z: body_z + bias_z - noise,
        rot_x: 0.001 + noise * 0.1,
        rot_y: -0.002,
        rot_z: 0.0005,
        attitude: [[c, 0.0, -s], [0.0, 1.0, 0.0], [s, 0.0, c]],
    }
}

fn simulated_fix(timestamp: f64, start: f64) -> PositionFix {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let seq = COUNTER.fetch_add(1, Ordering::Relaxed) as f64;
    let elapsed = timestamp - start;

    let speed = if elapsed < SIM_STANDSTILL_SECS {
        0.0
    } else {
        (6.0 + (seq * 0.3).sin() * 1.5).max(0.0)
    };

    PositionFix {
        timestamp,
        speed,
        horizontal_accuracy: 5.0 + (seq * 0.1).sin().abs() * 15.0,
    }
}

pub fn current_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
