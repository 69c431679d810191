#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use quiz_attempt::config::TimerSettings;
use quiz_attempt::error::{AttemptError, Result};
use quiz_attempt::models::{
    AssignmentResponse, AttemptContext, Submission, SubmissionResults, SubmitRequest,
    SubmitResponse,
};
use quiz_attempt::services::api_client::AssignmentApi;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
}

pub fn timer_settings() -> TimerSettings {
    TimerSettings {
        tick_interval_ms: 1000,
        autosave_every_ticks: 10,
    }
}

/// Questions cycle through single-select, short answer and essay; ids are
/// `q1..qN` and every selectable question offers `a1` and `a2`.
pub fn assignment_response(
    question_count: usize,
    time_limit_minutes: Option<u32>,
    cant_go_back: bool,
) -> AssignmentResponse {
    let questions: Vec<serde_json::Value> = (1..=question_count)
        .map(|n| match n % 3 {
            1 => json!({
                "_id": format!("q{}", n),
                "text": format!("Question {}", n),
                "points": 2,
                "type": "single_select",
                "answers": [
                    { "_id": "a1", "text": "first" },
                    { "_id": "a2", "text": "second" }
                ]
            }),
            2 => json!({
                "_id": format!("q{}", n),
                "text": format!("Question {}", n),
                "points": 1,
                "type": "short_answer"
            }),
            _ => json!({
                "_id": format!("q{}", n),
                "text": format!("Question {}", n),
                "points": 5,
                "type": "essay"
            }),
        })
        .collect();

    serde_json::from_value(json!({
        "success": true,
        "assignment": {
            "_id": "asg-1",
            "title": "Derivatives quiz",
            "hasTimeLimit": time_limit_minutes.is_some(),
            "timeLimitMinutes": time_limit_minutes,
            "oneQuestionAtTime": true,
            "cantGoBack": cant_go_back
        },
        "questions": questions,
        "hasSubmitted": false,
        "canRetake": true
    }))
    .expect("fixture is valid")
}

pub fn context(
    question_count: usize,
    time_limit_minutes: Option<u32>,
    cant_go_back: bool,
) -> AttemptContext {
    let response = assignment_response(question_count, time_limit_minutes, cant_go_back);
    AttemptContext {
        assignment: response.assignment.expect("fixture has assignment"),
        questions: response.questions,
    }
}

pub fn accepted() -> SubmitResponse {
    SubmitResponse {
        success: true,
        message: None,
        submission: Some(Submission {
            id: "sub-1".to_string(),
            score: None,
            max_score: Some(10.0),
            status: Some("submitted".to_string()),
            submitted_at: None,
        }),
        show_correct_answers: false,
    }
}

/// In-process backend: records every submission, fails on demand and can
/// hold submissions until released.
pub struct FakeApi {
    assignment: Mutex<AssignmentResponse>,
    failures: Mutex<VecDeque<AttemptError>>,
    submissions: Mutex<Vec<(String, SubmitRequest)>>,
    gate: Option<Arc<Notify>>,
}

impl FakeApi {
    pub fn new(assignment: AssignmentResponse) -> Self {
        Self {
            assignment: Mutex::new(assignment),
            failures: Mutex::new(VecDeque::new()),
            submissions: Mutex::new(Vec::new()),
            gate: None,
        }
    }

    /// Submissions block until `gate.notify_one()` is called.
    pub fn gated(assignment: AssignmentResponse, gate: Arc<Notify>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::new(assignment)
        }
    }

    pub fn fail_next_submit(&self, error: AttemptError) {
        self.failures.lock().unwrap().push_back(error);
    }

    pub fn submissions(&self) -> Vec<(String, SubmitRequest)> {
        self.submissions.lock().unwrap().clone()
    }

    pub fn submit_count(&self) -> usize {
        self.submissions.lock().unwrap().len()
    }
}

#[async_trait]
impl AssignmentApi for FakeApi {
    async fn fetch_assignment(&self, _assignment_id: &str) -> Result<AssignmentResponse> {
        Ok(self.assignment.lock().unwrap().clone())
    }

    async fn submit(&self, assignment_id: &str, request: &SubmitRequest) -> Result<SubmitResponse> {
        self.submissions
            .lock()
            .unwrap()
            .push((assignment_id.to_string(), request.clone()));

        if let Some(gate) = &self.gate {
            gate.notified().await;
        }

        let failure = self.failures.lock().unwrap().pop_front();
        match failure {
            Some(error) => Err(error),
            None => Ok(accepted()),
        }
    }

    async fn fetch_results(&self, submission_id: &str) -> Result<SubmissionResults> {
        Ok(SubmissionResults(json!({ "submissionId": submission_id })))
    }
}
