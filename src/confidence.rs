//! Anti-drift safeguard for near-stationary periods.
//!
//! Integrating noisy acceleration at a standstill accumulates a small
//! phantom speed that the covariance alone does not pull back. Each sample
//! applies a gentle damping proportional to the lack of movement
//! confidence, and a sustained run of low confidence forces the speed to
//! zero.

use crate::config::DecayConfig;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DecayAction {
    /// Multiply the published speed by this, in [1 - damping_constant, 1].
    pub damping_factor: f64,
    /// Low confidence has lasted long enough; zero the speed state.
    pub force_stop: bool,
    /// How long confidence has been low as of this sample, 0 if it is not.
    pub low_for_secs: f64,
}

pub struct ConfidenceDecay {
    config: DecayConfig,
    low_since: Option<f64>,
}

impl ConfidenceDecay {
    pub fn new(config: DecayConfig) -> Self {
        Self {
            config,
            low_since: None,
        }
    }

    pub fn damping_factor(&self, confidence: f64) -> f64 {
        let confidence = if confidence.is_nan() { 0.0 } else { confidence.clamp(0.0, 1.0) };
        1.0 - (1.0 - confidence) * self.config.damping_constant
    }

    pub fn observe(&mut self, confidence: f64, timestamp: f64) -> DecayAction {
        let damping_factor = self.damping_factor(confidence);

        if confidence >= self.config.low_confidence_threshold {
            self.low_since = None;
            return DecayAction { damping_factor, force_stop: false, low_for_secs: 0.0 };
        }

        let since = *self.low_since.get_or_insert(timestamp);
        let low_for_secs = (timestamp - since).max(0.0);
        let force_stop = low_for_secs >= self.config.stillness_secs;
        if force_stop {
            // Next forced stop needs another full stillness period.
            self.low_since = Some(timestamp);
        }

        DecayAction { damping_factor, force_stop, low_for_secs }
    }

    pub fn low_confidence_for(&self, timestamp: f64) -> f64 {
        self.low_since.map(|since| (timestamp - since).max(0.0)).unwrap_or(0.0)
    }

    pub fn reset(&mut self) {
        self.low_since = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn decay() -> ConfidenceDecay {
        ConfidenceDecay::new(DecayConfig {
            damping_constant: 0.01,
            low_confidence_threshold: 0.05,
            stillness_secs: 5.0,
        })
    }

    #[test]
    fn test_damping_factor_scales_with_missing_confidence() {
        let d = decay();
        assert_relative_eq!(d.damping_factor(1.0), 1.0);
        assert_relative_eq!(d.damping_factor(0.0), 0.99);
        assert_relative_eq!(d.damping_factor(0.5), 0.995);
    }

    #[test]
    fn test_sustained_low_confidence_forces_stop() {
        let mut d = decay();
        let mut fired_at = None;
        for i in 0..=300 {
            let t = i as f64 * 0.02;
            if d.observe(0.01, t).force_stop {
                fired_at = Some(t);
                break;
            }
        }
        let fired_at = fired_at.unwrap();
        assert!(fired_at >= 5.0 && fired_at < 5.03, "fired at {fired_at}");
    }

    #[test]
    fn test_single_confident_sample_restarts_timer() {
        let mut d = decay();
        for i in 0..200 {
            let t = i as f64 * 0.02;
            let confidence = if i == 150 { 0.05 } else { 0.0 };
            assert!(!d.observe(confidence, t).force_stop, "unexpected stop at {t}");
        }
        // Timer restarted at the sample after i == 150 (t = 3.02).
        assert_relative_eq!(d.low_confidence_for(3.98), 0.96, epsilon = 1e-9);
    }

    #[test]
    fn test_timer_restarts_after_forced_stop() {
        let mut d = decay();
        assert!(!d.observe(0.0, 0.0).force_stop);
        assert!(d.observe(0.0, 5.0).force_stop);
        assert!(!d.observe(0.0, 9.0).force_stop);
        assert!(d.observe(0.0, 10.0).force_stop);
    }

    #[test]
    fn test_reset_clears_timer() {
        let mut d = decay();
        d.observe(0.0, 0.0);
        d.reset();
        assert_eq!(d.low_confidence_for(4.0), 0.0);
        assert!(!d.observe(0.0, 5.0).force_stop);
    }
}
