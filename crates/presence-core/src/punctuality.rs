//! Check-in time → punctuality label.

use crate::types::AttendanceStatus;
use chrono::NaiveTime;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BoundaryError {
    #[error("grace period end {grace_end} is before work start {start}")]
    GraceBeforeStart {
        start: NaiveTime,
        grace_end: NaiveTime,
    },
}

/// Process-wide punctuality boundaries.
///
/// Both boundary instants are inclusive for `on_time`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PunctualityClassifier {
    start: NaiveTime,
    grace_end: NaiveTime,
}

impl PunctualityClassifier {
    pub fn new(start: NaiveTime, grace_end: NaiveTime) -> Result<Self, BoundaryError> {
        if grace_end < start {
            return Err(BoundaryError::GraceBeforeStart { start, grace_end });
        }
        Ok(Self { start, grace_end })
    }

    pub fn start(&self) -> NaiveTime {
        self.start
    }

    pub fn grace_end(&self) -> NaiveTime {
        self.grace_end
    }

    pub fn classify(&self, time: NaiveTime) -> AttendanceStatus {
        if time < self.start {
            AttendanceStatus::Early
        } else if time <= self.grace_end {
            AttendanceStatus::OnTime
        } else {
            AttendanceStatus::Late
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(h: u32, m: u32, s: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, s).unwrap()
    }

    fn office_hours() -> PunctualityClassifier {
        PunctualityClassifier::new(t(8, 0, 0), t(8, 15, 0)).unwrap()
    }

    #[test]
    fn test_before_start_is_early() {
        assert_eq!(office_hours().classify(t(7, 59, 0)), AttendanceStatus::Early);
        assert_eq!(office_hours().classify(t(0, 0, 0)), AttendanceStatus::Early);
    }

    #[test]
    fn test_within_grace_is_on_time() {
        assert_eq!(office_hours().classify(t(8, 10, 0)), AttendanceStatus::OnTime);
    }

    #[test]
    fn test_after_grace_is_late() {
        assert_eq!(office_hours().classify(t(8, 16, 0)), AttendanceStatus::Late);
        assert_eq!(office_hours().classify(t(23, 59, 59)), AttendanceStatus::Late);
    }

    #[test]
    fn test_boundary_instants_are_on_time() {
        let c = office_hours();
        assert_eq!(c.classify(t(8, 0, 0)), AttendanceStatus::OnTime);
        assert_eq!(c.classify(t(8, 15, 0)), AttendanceStatus::OnTime);
    }

    #[test]
    fn test_sub_second_around_boundaries() {
        let c = office_hours();
        let just_before = NaiveTime::from_hms_milli_opt(7, 59, 59, 999).unwrap();
        let just_after = NaiveTime::from_hms_milli_opt(8, 15, 0, 1).unwrap();
        assert_eq!(c.classify(just_before), AttendanceStatus::Early);
        assert_eq!(c.classify(just_after), AttendanceStatus::Late);
    }

    #[test]
    fn test_zero_length_grace() {
        let c = PunctualityClassifier::new(t(9, 0, 0), t(9, 0, 0)).unwrap();
        assert_eq!(c.classify(t(9, 0, 0)), AttendanceStatus::OnTime);
        assert_eq!(c.classify(t(9, 0, 1)), AttendanceStatus::Late);
    }

    #[test]
    fn test_inverted_boundaries_rejected() {
        let err = PunctualityClassifier::new(t(8, 15, 0), t(8, 0, 0)).unwrap_err();
        assert!(matches!(err, BoundaryError::GraceBeforeStart { .. }));
    }
}
