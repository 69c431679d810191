use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod answer;
pub mod timer;

pub use answer::{AnswerRecord, AnswerUpdate, PersistedAttempt};

/// Quiz configuration as delivered by `GET /api/assignments/{id}`.
/// Immutable for the lifetime of an attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    #[serde(alias = "_id")]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub available_from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub available_until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub allowed_attempts: Option<u32>,
    #[serde(default)]
    pub shuffle_questions: bool,
    #[serde(default)]
    pub shuffle_answers: bool,
    #[serde(default)]
    pub has_time_limit: bool,
    #[serde(default)]
    pub time_limit_minutes: Option<u32>,
    #[serde(default)]
    pub one_question_at_time: bool,
    #[serde(default)]
    pub cant_go_back: bool,
}

impl Assignment {
    /// Initial countdown budget, `None` for untimed quizzes.
    pub fn time_budget_seconds(&self) -> Option<u32> {
        if !self.has_time_limit {
            return None;
        }
        self.time_limit_minutes
            .filter(|minutes| *minutes > 0)
            .map(|minutes| minutes.saturating_mul(60))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    #[serde(alias = "multiple_choice")]
    SingleSelect,
    TrueFalse,
    ShortAnswer,
    Essay,
    FileUpload,
    /// Any type this client does not know. Handled like free text.
    #[serde(other)]
    Unsupported,
}

impl QuestionType {
    /// Selectable questions are answered by choosing a candidate answer id,
    /// everything else by free text.
    pub fn is_selectable(self) -> bool {
        matches!(self, QuestionType::SingleSelect | QuestionType::TrueFalse)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerOption {
    #[serde(alias = "_id")]
    pub id: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    #[serde(alias = "_id")]
    pub id: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub points: f64,
    #[serde(rename = "type")]
    pub question_type: QuestionType,
    #[serde(default)]
    pub answers: Vec<AnswerOption>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    #[serde(alias = "_id")]
    pub id: String,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub max_score: Option<f64>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub submitted_at: Option<DateTime<Utc>>,
}

/// Body of `GET /api/assignments/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentResponse {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    pub assignment: Option<Assignment>,
    #[serde(default)]
    pub questions: Vec<Question>,
    #[serde(default)]
    pub has_submitted: bool,
    #[serde(default)]
    pub can_retake: bool,
    #[serde(default)]
    pub submission: Option<Submission>,
}

/// Everything needed to start or resume an attempt.
#[derive(Debug, Clone)]
pub struct AttemptContext {
    pub assignment: Assignment,
    pub questions: Vec<Question>,
}

/// One entry of the outbound answer map. Only answered questions are sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmittedAnswer {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_answer: Option<String>,
}

/// Body of `POST /api/assignments/{id}/submit`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    pub answers: std::collections::BTreeMap<String, SubmittedAnswer>,
    pub time_started: DateTime<Utc>,
    pub time_completed: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    pub submission: Option<Submission>,
    #[serde(default)]
    pub show_correct_answers: bool,
}

/// Graded review payload. The attempt engine never looks inside it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionResults(pub serde_json::Value);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitReason {
    User,
    Timeout,
}

impl SubmitReason {
    pub fn as_str(self) -> &'static str {
        match self {
            SubmitReason::User => "user",
            SubmitReason::Timeout => "timeout",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptLifecycle {
    NotStarted,
    InProgress,
    Submitting,
    Submitted,
}

/// Read-only view of an attempt for rendering.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttemptSnapshot {
    pub assignment_id: String,
    pub current_index: usize,
    pub question_count: usize,
    pub answered_count: usize,
    pub flagged_count: usize,
    pub time_remaining: Option<u32>,
    pub lifecycle: AttemptLifecycle,
}
