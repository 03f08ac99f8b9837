//! Alert deduplication for unknown faces.
//!
//! One gate per live loop. At most one alert is dispatched per timeout
//! window, no matter how many unknown faces show up in that window.

use crate::types::Decision;

/// Loop-wide alert arming state.
///
/// Minutes are absolute wall-clock minutes (e.g. seconds since the Unix epoch
/// divided by 60), so the elapsed check does not wrap at the hour.
#[derive(Debug, Clone)]
pub struct AlertGate {
    armed: bool,
    last_alert_minute: i64,
    timeout_minutes: i64,
}

impl AlertGate {
    pub fn new(timeout_minutes: i64) -> Self {
        Self {
            armed: true,
            last_alert_minute: 0,
            timeout_minutes,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn last_alert_minute(&self) -> i64 {
        self.last_alert_minute
    }

    /// Evaluate one face. Returns `true` when an alert must be dispatched now.
    ///
    /// Re-arming only happens here, so a gate that sees no faces after
    /// disarming stays disarmed regardless of elapsed time.
    pub fn evaluate(&mut self, decision: &Decision, now_minute: i64) -> bool {
        if !self.armed && now_minute - self.last_alert_minute > self.timeout_minutes {
            tracing::debug!(
                last = self.last_alert_minute,
                now = now_minute,
                "alert gate re-armed"
            );
            self.armed = true;
        }

        if decision.is_unknown() && self.armed {
            self.armed = false;
            self.last_alert_minute = now_minute;
            return true;
        }

        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn known() -> Decision {
        Decision::Known("alice".into())
    }

    #[test]
    fn test_starts_armed() {
        assert!(AlertGate::new(1).is_armed());
    }

    #[test]
    fn test_dedup_within_timeout_then_realert() {
        let mut gate = AlertGate::new(1);
        assert!(gate.evaluate(&Decision::Unknown, 10));
        assert!(!gate.is_armed());
        assert_eq!(gate.last_alert_minute(), 10);

        assert!(!gate.evaluate(&Decision::Unknown, 10));
        assert!(gate.evaluate(&Decision::Unknown, 12));
        assert_eq!(gate.last_alert_minute(), 12);
    }

    #[test]
    fn test_elapsed_must_exceed_timeout() {
        let mut gate = AlertGate::new(1);
        assert!(gate.evaluate(&Decision::Unknown, 10));
        // 11 - 10 == timeout, not greater.
        assert!(!gate.evaluate(&Decision::Unknown, 11));
        assert!(gate.evaluate(&Decision::Unknown, 12));
    }

    #[test]
    fn test_known_faces_never_alert() {
        let mut gate = AlertGate::new(1);
        for minute in 0..5 {
            assert!(!gate.evaluate(&known(), minute));
        }
        assert!(gate.is_armed());
    }

    #[test]
    fn test_known_face_rearms_without_alerting() {
        let mut gate = AlertGate::new(1);
        assert!(gate.evaluate(&Decision::Unknown, 10));
        assert!(!gate.evaluate(&known(), 20));
        assert!(gate.is_armed());
        assert_eq!(gate.last_alert_minute(), 10);
    }

    #[test]
    fn test_no_evaluation_stays_disarmed() {
        let mut gate = AlertGate::new(1);
        assert!(gate.evaluate(&Decision::Unknown, 10));
        // Time passes but nothing is evaluated: the gate cannot re-arm itself.
        assert!(!gate.is_armed());
    }
}
