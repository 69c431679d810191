use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Submission, SubmitReason};

/// Notifications published by a running attempt.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum AttemptEvent {
    TimerTick(TimerTick),
    TimeExpired(TimeExpired),
    Autosaved(Autosaved),
    SubmissionStarted(SubmissionStarted),
    Submitted(Submitted),
    SubmissionFailed(SubmissionFailed),
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TimerTick {
    pub assignment_id: String,
    pub remaining_seconds: u32,
    pub elapsed_seconds: u32,
    pub total_seconds: u32,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TimeExpired {
    pub assignment_id: String,
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Autosaved {
    pub assignment_id: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SubmissionStarted {
    pub assignment_id: String,
    pub reason: SubmitReason,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Submitted {
    pub assignment_id: String,
    pub reason: SubmitReason,
    pub submission: Option<Submission>,
    pub show_correct_answers: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SubmissionFailed {
    pub assignment_id: String,
    pub reason: SubmitReason,
    pub message: String,
    pub retryable: bool,
    pub timestamp: DateTime<Utc>,
}

impl AttemptEvent {
    pub fn to_json_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    pub fn event_name(&self) -> &'static str {
        match self {
            AttemptEvent::TimerTick(_) => "timer-tick",
            AttemptEvent::TimeExpired(_) => "time-expired",
            AttemptEvent::Autosaved(_) => "autosaved",
            AttemptEvent::SubmissionStarted(_) => "submission-started",
            AttemptEvent::Submitted(_) => "submitted",
            AttemptEvent::SubmissionFailed(_) => "submission-failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_tag_matches_event_name() {
        let event = AttemptEvent::TimerTick(TimerTick {
            assignment_id: "asg-1".to_string(),
            remaining_seconds: 59,
            elapsed_seconds: 1,
            total_seconds: 60,
            timestamp: Utc::now(),
        });

        let value: serde_json::Value = serde_json::from_str(&event.to_json_line()).unwrap();
        assert_eq!(value["type"], event.event_name());
        assert_eq!(value["remaining_seconds"], 59);
    }

    #[test]
    fn test_failure_event_serialization() {
        let event = AttemptEvent::SubmissionFailed(SubmissionFailed {
            assignment_id: "asg-1".to_string(),
            reason: SubmitReason::Timeout,
            message: "connection reset".to_string(),
            retryable: true,
            timestamp: Utc::now(),
        });

        let json = event.to_json_line();
        assert!(json.contains("\"type\":\"submission-failed\""));
        assert!(json.contains("\"reason\":\"timeout\""));
    }
}
