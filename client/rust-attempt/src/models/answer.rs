use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-question answer state for an attempt in progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerRecord {
    pub question_id: String,
    #[serde(default)]
    pub selected_answer_id: Option<String>,
    #[serde(default)]
    pub text_answer: Option<String>,
    #[serde(default)]
    pub is_answered: bool,
    #[serde(default)]
    pub flagged: bool,
}

impl AnswerRecord {
    pub fn new(question_id: impl Into<String>) -> Self {
        Self {
            question_id: question_id.into(),
            selected_answer_id: None,
            text_answer: None,
            is_answered: false,
            flagged: false,
        }
    }

    /// A record counts as answered when it holds a selection or non-blank text.
    pub fn compute_answered(&self) -> bool {
        let has_selection = self
            .selected_answer_id
            .as_deref()
            .is_some_and(|id| !id.is_empty());
        let has_text = self
            .text_answer
            .as_deref()
            .is_some_and(|text| !text.trim().is_empty());
        has_selection || has_text
    }

    pub fn refresh_answered(&mut self) {
        self.is_answered = self.compute_answered();
    }
}

/// Partial update coming from the UI. Absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerUpdate {
    #[serde(default)]
    pub selected_answer_id: Option<String>,
    #[serde(default)]
    pub text_answer: Option<String>,
}

impl AnswerUpdate {
    pub fn select(answer_id: impl Into<String>) -> Self {
        Self {
            selected_answer_id: Some(answer_id.into()),
            text_answer: None,
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self {
            selected_answer_id: None,
            text_answer: Some(text.into()),
        }
    }
}

/// Durable per-assignment slot written by the attempt store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedAttempt {
    pub answers: Vec<AnswerRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_remaining: Option<u32>,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub current_index: usize,
    pub timestamp: DateTime<Utc>,
    pub last_saved: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whitespace_text_is_not_an_answer() {
        let mut record = AnswerRecord::new("q1");
        record.text_answer = Some("   \n\t".to_string());
        record.refresh_answered();
        assert!(!record.is_answered);

        record.text_answer = Some("  x ".to_string());
        record.refresh_answered();
        assert!(record.is_answered);
    }

    #[test]
    fn test_selection_counts_as_answer() {
        let mut record = AnswerRecord::new("q1");
        record.selected_answer_id = Some("a3".to_string());
        assert!(record.compute_answered());

        record.selected_answer_id = Some(String::new());
        assert!(!record.compute_answered());
    }

    #[test]
    fn test_persisted_attempt_uses_camel_case() {
        let now = Utc::now();
        let slot = PersistedAttempt {
            answers: vec![AnswerRecord::new("q1")],
            time_remaining: Some(42),
            start_time: Some(now),
            current_index: 0,
            timestamp: now,
            last_saved: now,
        };

        let json = serde_json::to_string(&slot).expect("Failed to serialize");
        assert!(json.contains("\"timeRemaining\":42"));
        assert!(json.contains("\"startTime\""));
        assert!(json.contains("\"lastSaved\""));
        assert!(json.contains("\"questionId\":\"q1\""));
        assert!(json.contains("\"isAnswered\":false"));
    }
}
