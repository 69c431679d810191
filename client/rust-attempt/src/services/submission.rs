use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{AttemptError, Result};
use crate::metrics::record_submission;
use crate::models::{SubmitReason, SubmitRequest, SubmitResponse, SubmittedAnswer};
use crate::services::api_client::AssignmentApi;
use crate::services::attempt_state::AttemptState;
use crate::services::attempt_store::AttemptStore;

/// In-flight guard: at most one submission per attempt is ever outstanding,
/// and none once one has succeeded.
#[derive(Debug, Clone, Default)]
pub struct SubmissionCoordinator {
    in_flight: Option<SubmitReason>,
    submitted: bool,
}

impl SubmissionCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_flight(&self) -> Option<SubmitReason> {
        self.in_flight
    }

    pub fn is_submitted(&self) -> bool {
        self.submitted
    }

    pub fn begin(&mut self, reason: SubmitReason) -> Result<()> {
        if self.submitted {
            record_submission(reason.as_str(), "rejected_submitted");
            return Err(AttemptError::AlreadySubmitted);
        }
        if let Some(current) = self.in_flight {
            tracing::debug!(
                "Submission ({}) ignored: {} submission already in flight",
                reason.as_str(),
                current.as_str()
            );
            record_submission(reason.as_str(), "rejected_in_flight");
            return Err(AttemptError::SubmissionInFlight);
        }
        self.in_flight = Some(reason);
        Ok(())
    }

    pub fn succeed(&mut self) {
        self.in_flight = None;
        self.submitted = true;
    }

    /// Releases the guard so the student can retry.
    pub fn fail(&mut self) {
        self.in_flight = None;
    }
}

/// Outbound payload: answered questions only, keyed by question id.
pub fn build_payload(state: &AttemptState, completed_at: DateTime<Utc>) -> SubmitRequest {
    let answers: BTreeMap<String, SubmittedAnswer> = state
        .answers()
        .iter()
        .filter(|record| record.compute_answered())
        .map(|record| {
            let answer_id = record
                .selected_answer_id
                .clone()
                .filter(|id| !id.is_empty());
            let text_answer = record
                .text_answer
                .clone()
                .filter(|text| !text.trim().is_empty());
            (
                record.question_id.clone(),
                SubmittedAnswer {
                    answer_id,
                    text_answer,
                },
            )
        })
        .collect();

    SubmitRequest {
        answers,
        time_started: state.started_at(),
        time_completed: completed_at,
    }
}

/// A submission that has passed the guard and is ready to go on the wire.
///
/// `send` owns everything it needs, so it can run on a detached task and
/// still purge the stored slot after the owning attempt has been torn down.
pub struct PendingSubmission {
    pub assignment_id: String,
    pub reason: SubmitReason,
    pub request: SubmitRequest,
    store: Arc<dyn AttemptStore>,
}

#[derive(Debug)]
pub struct SubmissionOutcome {
    pub reason: SubmitReason,
    pub result: Result<SubmitResponse>,
}

impl PendingSubmission {
    pub(crate) fn new(
        assignment_id: String,
        reason: SubmitReason,
        request: SubmitRequest,
        store: Arc<dyn AttemptStore>,
    ) -> Self {
        Self {
            assignment_id,
            reason,
            request,
            store,
        }
    }

    pub async fn send(self, api: Arc<dyn AssignmentApi>) -> SubmissionOutcome {
        let result = api.submit(&self.assignment_id, &self.request).await;

        match &result {
            Ok(_) => {
                // the backend holds the answers now; the local slot is only a liability
                if let Err(e) = self.store.clear(&self.assignment_id).await {
                    tracing::error!(
                        "Submission for {} accepted but clearing the local slot failed: {}",
                        self.assignment_id,
                        e
                    );
                }
            }
            Err(e) => {
                tracing::warn!(
                    "Submission ({}) for {} failed, keeping local slot: {}",
                    self.reason.as_str(),
                    self.assignment_id,
                    e
                );
            }
        }

        SubmissionOutcome {
            reason: self.reason,
            result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AnswerOption, AnswerUpdate, Assignment, AttemptLifecycle, Question, QuestionType};

    #[test]
    fn test_guard_rejects_second_submission() {
        let mut coordinator = SubmissionCoordinator::new();
        coordinator.begin(SubmitReason::User).unwrap();
        assert!(matches!(
            coordinator.begin(SubmitReason::Timeout),
            Err(AttemptError::SubmissionInFlight)
        ));
        assert_eq!(coordinator.in_flight(), Some(SubmitReason::User));
    }

    #[test]
    fn test_guard_released_after_failure() {
        let mut coordinator = SubmissionCoordinator::new();
        coordinator.begin(SubmitReason::Timeout).unwrap();
        coordinator.fail();
        assert!(coordinator.begin(SubmitReason::User).is_ok());
    }

    #[test]
    fn test_no_submission_after_success() {
        let mut coordinator = SubmissionCoordinator::new();
        coordinator.begin(SubmitReason::User).unwrap();
        coordinator.succeed();
        assert!(coordinator.is_submitted());
        assert!(matches!(
            coordinator.begin(SubmitReason::User),
            Err(AttemptError::AlreadySubmitted)
        ));
    }

    #[test]
    fn test_payload_contains_answered_questions_only() {
        let assignment: Assignment =
            serde_json::from_value(serde_json::json!({ "id": "asg-1" })).unwrap();
        let questions = vec![
            Question {
                id: "q1".to_string(),
                text: String::new(),
                points: 1.0,
                question_type: QuestionType::SingleSelect,
                answers: vec![AnswerOption {
                    id: "a1".to_string(),
                    text: "yes".to_string(),
                }],
            },
            Question {
                id: "q2".to_string(),
                text: String::new(),
                points: 1.0,
                question_type: QuestionType::ShortAnswer,
                answers: Vec::new(),
            },
            Question {
                id: "q3".to_string(),
                text: String::new(),
                points: 1.0,
                question_type: QuestionType::Essay,
                answers: Vec::new(),
            },
        ];
        let started = Utc::now();
        let mut state = AttemptState::initialize(&assignment, &questions, started);
        state.set_lifecycle(AttemptLifecycle::InProgress);
        state.update_answer("q1", AnswerUpdate::select("a1"));
        state.update_answer("q2", AnswerUpdate::text("   "));
        state.update_answer("q3", AnswerUpdate::text("because"));
        state.toggle_flag("q2");

        let completed = started + chrono::Duration::seconds(30);
        let payload = build_payload(&state, completed);

        assert_eq!(payload.answers.len(), 2);
        assert_eq!(
            payload.answers["q1"],
            SubmittedAnswer {
                answer_id: Some("a1".to_string()),
                text_answer: None
            }
        );
        assert_eq!(
            payload.answers["q3"].text_answer.as_deref(),
            Some("because")
        );
        assert!(!payload.answers.contains_key("q2"));
        assert_eq!(payload.time_started, started);
        assert_eq!(payload.time_completed, completed);
    }
}
