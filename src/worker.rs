//! Single-owner estimator task.
//!
//! Motion samples and speed fixes come from independent sensors, so neither
//! stream can be trusted to be serialized with the other. Both go through
//! one mpsc channel into one task that owns the `SpeedFusion`; consumers
//! read snapshots from a watch channel and never touch the state.

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::{CadenceConfig, EstimatorConfig};
use crate::record::SampleRecord;
use crate::sensor_fusion::{FusionEvent, FusionSnapshot, SpeedFusion};
use crate::types::{MotionSample, PositionFix, RideContext};

const INPUT_CAPACITY: usize = 500;

#[derive(Clone, Debug)]
pub enum EstimatorInput {
    Motion(MotionSample),
    Fix(PositionFix),
    Context(RideContext),
    Cadence(CadenceConfig),
    Reset,
}

/// Cloneable producer side of the estimator task.
#[derive(Clone)]
pub struct EstimatorHandle {
    tx: mpsc::Sender<EstimatorInput>,
    snapshots: watch::Receiver<FusionSnapshot>,
}

impl EstimatorHandle {
    /// Producer-side sender for loops that push their own samples.
    pub fn sender(&self) -> mpsc::Sender<EstimatorInput> {
        self.tx.clone()
    }

    pub async fn send(&self, input: EstimatorInput) -> bool {
        self.tx.send(input).await.is_ok()
    }

    pub async fn push_motion(&self, sample: MotionSample) -> bool {
        self.send(EstimatorInput::Motion(sample)).await
    }

    pub async fn push_fix(&self, fix: PositionFix) -> bool {
        self.send(EstimatorInput::Fix(fix)).await
    }

    pub async fn set_context(&self, context: RideContext) -> bool {
        self.send(EstimatorInput::Context(context)).await
    }

    pub async fn reset(&self) -> bool {
        self.send(EstimatorInput::Reset).await
    }

    /// Latest published snapshot.
    pub fn snapshot(&self) -> FusionSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<FusionSnapshot> {
        self.snapshots.clone()
    }
}

/// Spawns the estimator task. Records are forwarded to `records` when given;
/// a full record channel drops records instead of stalling estimation.
/// The task ends once every handle and sender is dropped and returns the
/// final fusion state.
pub fn spawn_estimator(
    config: EstimatorConfig,
    records: Option<mpsc::Sender<SampleRecord>>,
) -> (EstimatorHandle, JoinHandle<SpeedFusion>) {
    let fusion = SpeedFusion::new(config);
    let (tx, rx) = mpsc::channel(INPUT_CAPACITY);
    let (snapshot_tx, snapshot_rx) = watch::channel(fusion.snapshot());

    let task = tokio::spawn(run(fusion, rx, snapshot_tx, records));
    (EstimatorHandle { tx, snapshots: snapshot_rx }, task)
}

async fn run(
    mut fusion: SpeedFusion,
    mut rx: mpsc::Receiver<EstimatorInput>,
    snapshots: watch::Sender<FusionSnapshot>,
    records: Option<mpsc::Sender<SampleRecord>>,
) -> SpeedFusion {
    let mut dropped_records = 0u64;

    while let Some(input) = rx.recv().await {
        match input {
            EstimatorInput::Motion(sample) => {
                let step = fusion.feed_motion(&sample);
                log_events(&step.events);
                if let (Some(record), Some(tx)) = (step.record, records.as_ref()) {
                    match tx.try_send(record) {
                        Ok(_) => {}
                        Err(mpsc::error::TrySendError::Full(_)) => {
                            dropped_records += 1;
                            if dropped_records % 100 == 1 {
                                log::warn!("[worker] record consumer lagging, {} dropped", dropped_records);
                            }
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => {}
                    }
                }
            }
            EstimatorInput::Fix(fix) => {
                let events = fusion.feed_fix(&fix);
                log_events(&events);
            }
            EstimatorInput::Context(context) => {
                log::debug!("[worker] ride context {:?}", context);
                fusion.set_ride_context(context);
            }
            EstimatorInput::Cadence(config) => {
                log::info!(
                    "[worker] cadence config: {} gears, wheel {:.3} m",
                    config.gear_ratios.len(),
                    config.wheel_circumference
                );
                fusion.set_cadence_config(config);
            }
            EstimatorInput::Reset => {
                log::info!("[worker] session reset");
                fusion.reset();
            }
        }
        snapshots.send_replace(fusion.snapshot());
    }

    log::debug!("[worker] input closed, {} records dropped", dropped_records);
    fusion
}

fn log_events(events: &[FusionEvent]) {
    for event in events {
        match event {
            FusionEvent::CalibrationStarted { at } => {
                log::info!("[calibration] window opened at t={:.2}s", at);
            }
            FusionEvent::CalibrationCompleted { bias } => {
                log::info!(
                    "[calibration] {} samples, accel bias ({:.4}, {:.4}, {:.4}), gyro bias ({:.4}, {:.4}, {:.4})",
                    bias.sample_count,
                    bias.accel.x,
                    bias.accel.y,
                    bias.accel.z,
                    bias.gyro.x,
                    bias.gyro.y,
                    bias.gyro.z
                );
            }
            FusionEvent::FixApplied { speed, accuracy, gain, measurement_noise } => {
                log::debug!(
                    "[fix] speed {:.2} m/s acc {:.1} m, R={:.3} K={:.3}",
                    speed,
                    accuracy,
                    measurement_noise,
                    gain
                );
            }
            FusionEvent::FixRejected { speed, accuracy, reason } => {
                log::warn!("[fix] rejected speed {:.2} acc {:.1}: {:?}", speed, accuracy, reason);
            }
            FusionEvent::ProcessNoiseReset => log::debug!("[fix] process noise reset"),
            FusionEvent::StillnessReset { still_for_secs, speed_before } => {
                log::info!(
                    "[stillness] {:.1}s without movement, speed {:.2} -> 0",
                    still_for_secs,
                    speed_before
                );
            }
            FusionEvent::SampleOutOfOrder { timestamp, previous } => {
                log::warn!("[motion] out of order sample t={:.3} after t={:.3}", timestamp, previous);
            }
            FusionEvent::InvalidTimestamp { timestamp } => {
                log::warn!("[motion] invalid timestamp {}", timestamp);
            }
            FusionEvent::InvalidReading { timestamp } => {
                log::warn!("[motion] non-finite reading at t={:.3}, dropped", timestamp);
            }
            FusionEvent::SampleGap { gap_secs } => {
                log::warn!("[motion] {:.2}s gap, not integrated", gap_secs);
            }
        }
    }
}
