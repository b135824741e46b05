//! Software AGC. Observes peak dBFS from the last spectrum frame and
//! nudges device gain in discrete steps toward a target, with
//! hysteresis and a rate limit. Never touches device state directly —
//! it posts a gain request for the coordinator to dispatch to the
//! Device Source.

use std::time::{Duration, Instant};

const TARGET_DBFS: f32 = -20.0;
const HYSTERESIS_DB: f32 = 6.0;
const STEP_DB: f32 = 3.0;
const RATE_LIMIT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GainRequest {
    Increase,
    Decrease,
}

pub struct SoftwareAgc {
    last_adjustment: Option<Instant>,
}

impl SoftwareAgc {
    #[must_use]
    pub fn new() -> Self {
        Self { last_adjustment: None }
    }

    /// Returns a gain request if `peak_dbfs` is outside the hysteresis
    /// band and the rate limit allows another adjustment now.
    pub fn observe(&mut self, peak_dbfs: f32, now: Instant) -> Option<GainRequest> {
        if let Some(last) = self.last_adjustment {
            if now.duration_since(last) < RATE_LIMIT {
                return None;
            }
        }
        let request = if peak_dbfs > TARGET_DBFS + HYSTERESIS_DB {
            Some(GainRequest::Decrease)
        } else if peak_dbfs < TARGET_DBFS - HYSTERESIS_DB {
            Some(GainRequest::Increase)
        } else {
            None
        };
        if request.is_some() {
            self.last_adjustment = Some(now);
        }
        request
    }

    #[must_use]
    pub fn step_db() -> f32 {
        STEP_DB
    }
}

impl Default for SoftwareAgc {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requests_decrease_above_band() {
        let mut agc = SoftwareAgc::new();
        let now = Instant::now();
        assert_eq!(agc.observe(-5.0, now), Some(GainRequest::Decrease));
    }

    #[test]
    fn requests_increase_below_band() {
        let mut agc = SoftwareAgc::new();
        let now = Instant::now();
        assert_eq!(agc.observe(-40.0, now), Some(GainRequest::Increase));
    }

    #[test]
    fn no_request_inside_band() {
        let mut agc = SoftwareAgc::new();
        let now = Instant::now();
        assert_eq!(agc.observe(-18.0, now), None);
    }

    #[test]
    fn rate_limited_to_one_per_second() {
        let mut agc = SoftwareAgc::new();
        let t0 = Instant::now();
        assert!(agc.observe(-5.0, t0).is_some());
        assert_eq!(agc.observe(-5.0, t0 + Duration::from_millis(200)), None);
        assert!(agc
            .observe(-5.0, t0 + Duration::from_millis(1100))
            .is_some());
    }
}
