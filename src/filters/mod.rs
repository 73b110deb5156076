pub mod speed_kalman;

pub use speed_kalman::{FilterState, RejectReason, SpeedKalman, UpdateOutcome};
