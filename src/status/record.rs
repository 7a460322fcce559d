// src/status/record.rs

//! Run records and the per-pair lifecycle state machine.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::exec::SubmissionHandle;

/// Lifecycle state of one (job, operation) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Known but not planned (waiting on prerequisites or pre-conditions).
    Pending,
    /// Planned in a scheduling pass, not yet handed to a backend.
    Eligible,
    /// Handed to a backend; at most one outstanding submission per pair.
    Submitted,
    /// The backend reports the work as running.
    Active,
    /// Post-conditions observed or completion marked explicitly.
    Completed,
    /// A condition or the operation itself failed. Needs an explicit retry.
    Error,
}

impl Status {
    /// Exhaustive transition table.
    ///
    /// `Completed` and `Error` only leave through an explicit reset to
    /// `Pending`; `Pending` can never jump straight to `Submitted`.
    pub fn can_transition_to(self, to: Status) -> bool {
        use Status::*;

        match (self, to) {
            (Pending, Eligible | Completed | Error) => true,
            (Pending, Pending | Submitted | Active) => false,

            (Eligible, Submitted | Pending | Completed | Error) => true,
            (Eligible, Eligible | Active) => false,

            (Submitted, Active | Completed | Error | Pending) => true,
            (Submitted, Submitted | Eligible) => false,

            (Active, Completed | Error | Pending) => true,
            (Active, Active | Eligible | Submitted) => false,

            (Completed, Pending) => true,
            (Completed, Eligible | Submitted | Active | Completed | Error) => false,

            (Error, Pending) => true,
            (Error, Eligible | Submitted | Active | Completed | Error) => false,
        }
    }

    /// A backend currently owns the pair.
    pub fn is_outstanding(self) -> bool {
        matches!(self, Status::Submitted | Status::Active)
    }

    /// Only an explicit reset moves the pair out of this state.
    pub fn is_stable(self) -> bool {
        matches!(self, Status::Completed | Status::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::Eligible => "eligible",
            Status::Submitted => "submitted",
            Status::Active => "active",
            Status::Completed => "completed",
            Status::Error => "error",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted status of one (job, operation) pair.
///
/// Stored in the job document as
/// `{"status": "...", "handle": ..., "updated_at": "<RFC 3339>"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub status: Status,
    pub handle: Option<SubmissionHandle>,
    pub updated_at: DateTime<Utc>,
    /// Failure detail for `error` records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl RunRecord {
    pub fn pending() -> Self {
        Self {
            status: Status::Pending,
            handle: None,
            updated_at: Utc::now(),
            message: None,
        }
    }

    /// The record after moving to `to`.
    ///
    /// Handles survive while a backend owns the pair (and into the terminal
    /// state, for diagnostics); going back to `pending`/`eligible` drops them.
    pub(crate) fn advanced(
        &self,
        to: Status,
        handle: Option<SubmissionHandle>,
        message: Option<String>,
    ) -> Self {
        let handle = match to {
            Status::Pending | Status::Eligible => None,
            Status::Submitted => handle,
            Status::Active | Status::Completed | Status::Error => handle.or(self.handle.clone()),
        };
        let message = match to {
            Status::Error => message,
            _ => None,
        };
        Self {
            status: to,
            handle,
            updated_at: Utc::now(),
            message,
        }
    }
}

impl Default for RunRecord {
    fn default() -> Self {
        Self::pending()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [Status; 6] = [
        Status::Pending,
        Status::Eligible,
        Status::Submitted,
        Status::Active,
        Status::Completed,
        Status::Error,
    ];

    #[test]
    fn happy_path_is_allowed() {
        assert!(Status::Pending.can_transition_to(Status::Eligible));
        assert!(Status::Eligible.can_transition_to(Status::Submitted));
        assert!(Status::Submitted.can_transition_to(Status::Active));
        assert!(Status::Active.can_transition_to(Status::Completed));
        assert!(Status::Active.can_transition_to(Status::Error));
        assert!(Status::Error.can_transition_to(Status::Pending));
        assert!(Status::Eligible.can_transition_to(Status::Pending));
    }

    #[test]
    fn stable_states_only_leave_through_pending() {
        for from in [Status::Completed, Status::Error] {
            for to in ALL {
                assert_eq!(from.can_transition_to(to), to == Status::Pending, "{from} -> {to}");
            }
        }
    }

    #[test]
    fn submitted_is_only_reachable_from_eligible() {
        for from in ALL {
            assert_eq!(
                from.can_transition_to(Status::Submitted),
                from == Status::Eligible,
                "{from} -> submitted"
            );
        }
    }

    #[test]
    fn self_transitions_are_rejected() {
        for s in ALL {
            assert!(!s.can_transition_to(s), "{s} -> {s}");
        }
    }

    #[test]
    fn handle_is_dropped_when_returning_to_pending() {
        let submitted = RunRecord::pending().advanced(
            Status::Submitted,
            Some(SubmissionHandle::new("42")),
            None,
        );
        let active = submitted.advanced(Status::Active, None, None);
        assert_eq!(active.handle, Some(SubmissionHandle::new("42")));

        let reset = active.advanced(Status::Pending, None, None);
        assert_eq!(reset.handle, None);
    }

    #[test]
    fn record_serializes_with_the_documented_schema() {
        let record = RunRecord::pending();
        let value = serde_json::to_value(&record).unwrap();
        let obj = value.as_object().unwrap();
        assert_eq!(obj["status"], "pending");
        assert!(obj["handle"].is_null());
        assert!(obj["updated_at"].is_string());
        assert!(!obj.contains_key("message"));
    }
}
