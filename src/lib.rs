//! Ride speed and cadence estimation from phone motion sensors and
//! location fixes.
//!
//! The pure pipeline lives in [`sensor_fusion::SpeedFusion`]; [`worker`]
//! wraps it in a tokio task so motion and fix producers on different
//! execution contexts are serialized onto one owner.

pub mod cadence;
pub mod calibration;
pub mod confidence;
pub mod config;
pub mod error;
pub mod filters;
pub mod projection;
pub mod record;
pub mod sensor_fusion;
pub mod sensors;
pub mod types;
pub mod worker;

pub use config::EstimatorConfig;
pub use error::{ConfigError, ConfigResult};
pub use record::SampleRecord;
pub use sensor_fusion::{FusionEvent, FusionSnapshot, MotionStep, SpeedFusion};
pub use types::{MotionSample, PositionFix, RideContext, Stance, Terrain};
pub use worker::{spawn_estimator, EstimatorHandle, EstimatorInput};
