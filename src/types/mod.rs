pub mod linalg;

pub use linalg::*;

use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

/// One motion-sensor reading: gravity-compensated body-frame acceleration,
/// body-frame rotation rate and the device attitude at that instant.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MotionSample {
    pub timestamp: f64,
    pub accel_x: f64,
    pub accel_y: f64,
    pub accel_z: f64,
    pub rot_x: f64,
    pub rot_y: f64,
    pub rot_z: f64,
    /// Row-major rotation from body frame to the horizontal reference frame.
    #[serde(default = "identity_attitude")]
    pub attitude: [[f64; 3]; 3],
}

impl MotionSample {
    /// Sample with identity attitude (device already level).
    pub fn level(timestamp: f64, accel: (f64, f64, f64), rotation: (f64, f64, f64)) -> Self {
        Self {
            timestamp,
            accel_x: accel.0,
            accel_y: accel.1,
            accel_z: accel.2,
            rot_x: rotation.0,
            rot_y: rotation.1,
            rot_z: rotation.2,
            attitude: identity_attitude(),
        }
    }

    pub fn accel(&self) -> AccelVec {
        Vector3::new(self.accel_x, self.accel_y, self.accel_z)
    }

    pub fn rotation_rate(&self) -> GyroVec {
        Vector3::new(self.rot_x, self.rot_y, self.rot_z)
    }

    pub fn attitude_matrix(&self) -> AttitudeMat {
        let m = &self.attitude;
        Matrix3::new(
            m[0][0], m[0][1], m[0][2],
            m[1][0], m[1][1], m[1][2],
            m[2][0], m[2][1], m[2][2],
        )
    }
}

pub fn identity_attitude() -> [[f64; 3]; 3] {
    [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]]
}

/// External ground-speed fix with its reported horizontal accuracy (meters).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PositionFix {
    pub timestamp: f64,
    pub speed: f64,
    pub horizontal_accuracy: f64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Terrain {
    Flat,
    Uphill,
    Downhill,
    #[default]
    Unknown,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stance {
    Seated,
    Standing,
    #[default]
    Unknown,
}

/// Rider-selected state supplied from outside the estimator.
/// Gear 0 means freewheeling.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RideContext {
    pub gear: u32,
    pub terrain: Terrain,
    pub stance: Stance,
}
