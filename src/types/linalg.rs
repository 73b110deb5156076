//! Linear algebra aliases for the motion pipeline
//!
//! Keeps the frame of each vector visible in signatures.

use nalgebra::{Matrix3, Vector3};

// ===== Body frame =====
pub type AccelVec = Vector3<f64>;
pub type GyroVec = Vector3<f64>;

// ===== Body -> horizontal reference frame =====
pub type AttitudeMat = Matrix3<f64>;

/// Flattens a vector into the tuple form used by serialized records.
pub fn to_tuple(v: &Vector3<f64>) -> (f64, f64, f64) {
    (v.x, v.y, v.z)
}
