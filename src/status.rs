use serde::Serialize;
use thiserror::Error;

/// Per-term enrollment progress. Stored as its integer code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum EnrollmentStatus {
    NotCleared,
    Cleared,
    Submitted,
    Processing,
    Enrolled,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("unknown enrollment status code {0}")]
    UnknownCode(i64),
    #[error("cannot move enrollment from {} to {}", .from.label(), .to.label())]
    NotAllowed {
        from: EnrollmentStatus,
        to: EnrollmentStatus,
    },
}

impl EnrollmentStatus {
    pub fn from_code(code: i64) -> Result<Self, TransitionError> {
        match code {
            0 => Ok(Self::NotCleared),
            1 => Ok(Self::Cleared),
            2 => Ok(Self::Submitted),
            3 => Ok(Self::Processing),
            4 => Ok(Self::Enrolled),
            other => Err(TransitionError::UnknownCode(other)),
        }
    }

    pub fn code(self) -> i64 {
        match self {
            Self::NotCleared => 0,
            Self::Cleared => 1,
            Self::Submitted => 2,
            Self::Processing => 3,
            Self::Enrolled => 4,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::NotCleared => "Not Cleared",
            Self::Cleared => "Cleared",
            Self::Submitted => "Submitted",
            Self::Processing => "Processing",
            Self::Enrolled => "Enrolled",
        }
    }

    pub fn can_transition_to(self, to: EnrollmentStatus) -> bool {
        use EnrollmentStatus::*;
        if self == to {
            return true;
        }
        matches!(
            (self, to),
            (NotCleared, Cleared)
                | (Cleared, NotCleared)
                | (Cleared, Submitted)
                | (Cleared, Processing)
                | (Submitted, Processing)
                | (Submitted, Cleared)
                | (Processing, Submitted)
                | (Processing, Enrolled)
                | (Processing, Cleared)
                | (Enrolled, Cleared)
        )
    }

    pub fn transition(self, to: EnrollmentStatus) -> Result<EnrollmentStatus, TransitionError> {
        if self.can_transition_to(to) {
            Ok(to)
        } else {
            Err(TransitionError::NotAllowed { from: self, to })
        }
    }

    /// Clearance toggles only between Not Cleared and Cleared; later stages
    /// move back through the staff revoke path instead.
    pub fn toggle_clearance(self, cleared: bool) -> Result<EnrollmentStatus, TransitionError> {
        let to = if cleared {
            Self::Cleared
        } else {
            Self::NotCleared
        };
        match self {
            Self::NotCleared | Self::Cleared => Ok(to),
            _ => Err(TransitionError::NotAllowed { from: self, to }),
        }
    }

    /// Only a fully enrolled term marks the student as enrolled.
    pub fn marks_enrolled(self) -> bool {
        self == Self::Enrolled
    }

    /// Status a brand new term row gets when the student submits subjects.
    pub fn initial_for_submission(is_regular: bool) -> Self {
        if is_regular {
            Self::Processing
        } else {
            Self::Submitted
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_roundtrip_through_enum() {
        for code in 0..=4 {
            let s = EnrollmentStatus::from_code(code).expect("known code");
            assert_eq!(s.code(), code);
        }
        assert_eq!(
            EnrollmentStatus::from_code(9),
            Err(TransitionError::UnknownCode(9))
        );
    }

    #[test]
    fn skipping_clearance_is_rejected() {
        let err = EnrollmentStatus::NotCleared
            .transition(EnrollmentStatus::Enrolled)
            .expect_err("0 -> 4");
        assert_eq!(
            err.to_string(),
            "cannot move enrollment from Not Cleared to Enrolled"
        );
        assert!(!EnrollmentStatus::NotCleared.can_transition_to(EnrollmentStatus::Submitted));
        assert!(!EnrollmentStatus::Enrolled.can_transition_to(EnrollmentStatus::Submitted));
    }

    #[test]
    fn revoke_path_returns_to_cleared() {
        for from in [
            EnrollmentStatus::Submitted,
            EnrollmentStatus::Processing,
            EnrollmentStatus::Enrolled,
        ] {
            assert!(from.can_transition_to(EnrollmentStatus::Cleared), "{:?}", from);
        }
    }

    #[test]
    fn clearance_toggle_stays_before_submission() {
        assert_eq!(
            EnrollmentStatus::NotCleared.toggle_clearance(true),
            Ok(EnrollmentStatus::Cleared)
        );
        assert_eq!(
            EnrollmentStatus::Cleared.toggle_clearance(false),
            Ok(EnrollmentStatus::NotCleared)
        );
        assert_eq!(
            EnrollmentStatus::Cleared.toggle_clearance(true),
            Ok(EnrollmentStatus::Cleared)
        );
        for from in [
            EnrollmentStatus::Submitted,
            EnrollmentStatus::Processing,
            EnrollmentStatus::Enrolled,
        ] {
            assert_eq!(
                from.toggle_clearance(true),
                Err(TransitionError::NotAllowed {
                    from,
                    to: EnrollmentStatus::Cleared
                })
            );
            assert!(from.toggle_clearance(false).is_err(), "{:?}", from);
        }
    }

    #[test]
    fn only_enrolled_marks_student() {
        assert!(EnrollmentStatus::Enrolled.marks_enrolled());
        assert!(!EnrollmentStatus::Processing.marks_enrolled());
    }
}
