use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::models::{
    AnswerRecord, AnswerUpdate, Assignment, AttemptLifecycle, PersistedAttempt, Question,
    QuestionType,
};
use crate::services::navigation::can_navigate;

#[derive(Debug, Clone)]
struct QuestionMeta {
    question_type: QuestionType,
    option_ids: Vec<String>,
}

/// In-memory state of one attempt: answer records, the question pointer,
/// the start time and the lifecycle flag.
///
/// Every mutation is a single `&mut self` call, so callers never observe a
/// half-applied update. Mutations addressed to unknown questions, or made
/// while the attempt is not in progress, are logged and ignored.
#[derive(Debug, Clone)]
pub struct AttemptState {
    assignment_id: String,
    cant_go_back: bool,
    questions: HashMap<String, QuestionMeta>,
    answers: Vec<AnswerRecord>,
    current_index: usize,
    started_at: DateTime<Utc>,
    lifecycle: AttemptLifecycle,
}

impl AttemptState {
    /// Fresh state: one unanswered, unflagged record per question.
    pub fn initialize(
        assignment: &Assignment,
        questions: &[Question],
        started_at: DateTime<Utc>,
    ) -> Self {
        let answers = questions
            .iter()
            .map(|question| AnswerRecord::new(question.id.clone()))
            .collect();

        Self {
            assignment_id: assignment.id.clone(),
            cant_go_back: assignment.cant_go_back,
            questions: index_questions(questions),
            answers,
            current_index: 0,
            started_at,
            lifecycle: AttemptLifecycle::NotStarted,
        }
    }

    /// Rebuilds state from a persisted slot. Returns `None` when the slot does
    /// not line up with the current question set and must be discarded.
    pub fn restore(
        assignment: &Assignment,
        questions: &[Question],
        slot: &PersistedAttempt,
        fallback_started_at: DateTime<Utc>,
    ) -> Option<Self> {
        if slot.answers.len() != questions.len() {
            tracing::warn!(
                "Discarding stale attempt slot for assignment {}: {} saved answers, {} questions",
                assignment.id,
                slot.answers.len(),
                questions.len()
            );
            return None;
        }

        let last_index = questions.len().saturating_sub(1);

        Some(Self {
            assignment_id: assignment.id.clone(),
            cant_go_back: assignment.cant_go_back,
            questions: index_questions(questions),
            answers: slot.answers.clone(),
            current_index: slot.current_index.min(last_index),
            started_at: slot.start_time.unwrap_or(fallback_started_at),
            lifecycle: AttemptLifecycle::NotStarted,
        })
    }

    pub fn assignment_id(&self) -> &str {
        &self.assignment_id
    }

    pub fn answers(&self) -> &[AnswerRecord] {
        &self.answers
    }

    pub fn answer(&self, question_id: &str) -> Option<&AnswerRecord> {
        self.answers
            .iter()
            .find(|record| record.question_id == question_id)
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn question_count(&self) -> usize {
        self.answers.len()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn lifecycle(&self) -> AttemptLifecycle {
        self.lifecycle
    }

    pub fn is_in_progress(&self) -> bool {
        self.lifecycle == AttemptLifecycle::InProgress
    }

    pub(crate) fn set_lifecycle(&mut self, lifecycle: AttemptLifecycle) {
        if self.lifecycle != lifecycle {
            tracing::debug!(
                "Attempt {} lifecycle {:?} -> {:?}",
                self.assignment_id,
                self.lifecycle,
                lifecycle
            );
            self.lifecycle = lifecycle;
        }
    }

    /// Applies a partial answer update. Only the field matching the
    /// question's type is taken; the other one is left as it was.
    /// Returns whether anything changed.
    pub fn update_answer(&mut self, question_id: &str, update: AnswerUpdate) -> bool {
        if !self.accepts_mutation("update_answer") {
            return false;
        }

        let Some(meta) = self.questions.get(question_id) else {
            tracing::error!(
                "Answer update for unknown question {} in assignment {}",
                question_id,
                self.assignment_id
            );
            return false;
        };

        let (selection, text) = if meta.question_type.is_selectable() {
            if update.text_answer.is_some() {
                tracing::warn!(
                    "Ignoring text answer for selectable question {}",
                    question_id
                );
            }
            let selection = match update.selected_answer_id {
                Some(answer_id)
                    if !meta.option_ids.is_empty() && !meta.option_ids.contains(&answer_id) =>
                {
                    tracing::warn!(
                        "Ignoring selection {} not offered by question {}",
                        answer_id,
                        question_id
                    );
                    None
                }
                other => other,
            };
            (selection, None)
        } else {
            if update.selected_answer_id.is_some() {
                tracing::warn!(
                    "Ignoring selection for free-text question {}",
                    question_id
                );
            }
            (None, update.text_answer)
        };

        if selection.is_none() && text.is_none() {
            return false;
        }

        let Some(record) = self
            .answers
            .iter_mut()
            .find(|record| record.question_id == question_id)
        else {
            tracing::error!(
                "No answer record for question {} in assignment {}",
                question_id,
                self.assignment_id
            );
            return false;
        };

        let before = record.clone();
        if let Some(answer_id) = selection {
            record.selected_answer_id = Some(answer_id);
        }
        if let Some(text) = text {
            record.text_answer = Some(text);
        }
        record.refresh_answered();

        *record != before
    }

    pub fn toggle_flag(&mut self, question_id: &str) -> bool {
        if !self.accepts_mutation("toggle_flag") {
            return false;
        }

        match self
            .answers
            .iter_mut()
            .find(|record| record.question_id == question_id)
        {
            Some(record) => {
                record.flagged = !record.flagged;
                true
            }
            None => {
                tracing::error!(
                    "Flag toggle for unknown question {} in assignment {}",
                    question_id,
                    self.assignment_id
                );
                false
            }
        }
    }

    /// Moves the question pointer if the index is in range and the
    /// navigation policy allows it.
    pub fn navigate_to(&mut self, index: usize) -> bool {
        if !self.accepts_mutation("navigate_to") {
            return false;
        }

        if index >= self.answers.len() {
            tracing::warn!(
                "Navigation to out-of-range index {} (question count {})",
                index,
                self.answers.len()
            );
            return false;
        }

        if !can_navigate(self.current_index, index, self.cant_go_back) {
            tracing::debug!(
                "Backward navigation {} -> {} rejected for assignment {}",
                self.current_index,
                index,
                self.assignment_id
            );
            return false;
        }

        let moved = self.current_index != index;
        self.current_index = index;
        moved
    }

    pub fn answered_count(&self) -> usize {
        self.answers
            .iter()
            .filter(|record| record.compute_answered())
            .count()
    }

    pub fn flagged_count(&self) -> usize {
        self.answers.iter().filter(|record| record.flagged).count()
    }

    pub fn to_persisted(&self, time_remaining: Option<u32>, now: DateTime<Utc>) -> PersistedAttempt {
        PersistedAttempt {
            answers: self.answers.clone(),
            time_remaining,
            start_time: Some(self.started_at),
            current_index: self.current_index,
            timestamp: now,
            last_saved: now,
        }
    }

    fn accepts_mutation(&self, operation: &str) -> bool {
        if self.is_in_progress() {
            return true;
        }
        tracing::debug!(
            "Ignoring {} on assignment {} in state {:?}",
            operation,
            self.assignment_id,
            self.lifecycle
        );
        false
    }
}

fn index_questions(questions: &[Question]) -> HashMap<String, QuestionMeta> {
    questions
        .iter()
        .map(|question| {
            (
                question.id.clone(),
                QuestionMeta {
                    question_type: question.question_type,
                    option_ids: question.answers.iter().map(|a| a.id.clone()).collect(),
                },
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AnswerOption;

    fn assignment(cant_go_back: bool) -> Assignment {
        serde_json::from_value(serde_json::json!({
            "id": "asg-1",
            "cantGoBack": cant_go_back
        }))
        .unwrap()
    }

    fn question(id: &str, question_type: QuestionType) -> Question {
        let answers = if question_type.is_selectable() {
            vec![
                AnswerOption {
                    id: "a1".to_string(),
                    text: "first".to_string(),
                },
                AnswerOption {
                    id: "a2".to_string(),
                    text: "second".to_string(),
                },
            ]
        } else {
            Vec::new()
        };
        Question {
            id: id.to_string(),
            text: String::new(),
            points: 1.0,
            question_type,
            answers,
        }
    }

    fn questions() -> Vec<Question> {
        vec![
            question("q1", QuestionType::SingleSelect),
            question("q2", QuestionType::ShortAnswer),
            question("q3", QuestionType::Essay),
            question("q4", QuestionType::TrueFalse),
            question("q5", QuestionType::ShortAnswer),
            question("q6", QuestionType::SingleSelect),
        ]
    }

    fn started(cant_go_back: bool) -> AttemptState {
        let mut state = AttemptState::initialize(&assignment(cant_go_back), &questions(), Utc::now());
        state.set_lifecycle(AttemptLifecycle::InProgress);
        state
    }

    #[test]
    fn test_initialize_builds_one_record_per_question() {
        let state = AttemptState::initialize(&assignment(false), &questions(), Utc::now());
        assert_eq!(state.question_count(), 6);
        assert_eq!(state.answered_count(), 0);
        assert_eq!(state.flagged_count(), 0);
        assert_eq!(state.lifecycle(), AttemptLifecycle::NotStarted);
        assert!(state.answers().iter().all(|r| !r.is_answered && !r.flagged));
    }

    #[test]
    fn test_mutations_ignored_before_start() {
        let mut state = AttemptState::initialize(&assignment(false), &questions(), Utc::now());
        assert!(!state.update_answer("q1", AnswerUpdate::select("a1")));
        assert!(!state.toggle_flag("q1"));
        assert_eq!(state.answered_count(), 0);
    }

    #[test]
    fn test_update_answer_respects_question_type() {
        let mut state = started(false);

        assert!(state.update_answer("q1", AnswerUpdate::select("a1")));
        // text on a selectable question does not clobber the selection
        assert!(!state.update_answer("q1", AnswerUpdate::text("free text")));
        let q1 = state.answer("q1").unwrap();
        assert_eq!(q1.selected_answer_id.as_deref(), Some("a1"));
        assert_eq!(q1.text_answer, None);

        assert!(state.update_answer("q2", AnswerUpdate::text("42")));
        assert!(!state.update_answer("q2", AnswerUpdate::select("a1")));
        let q2 = state.answer("q2").unwrap();
        assert_eq!(q2.text_answer.as_deref(), Some("42"));
        assert_eq!(q2.selected_answer_id, None);

        assert_eq!(state.answered_count(), 2);
    }

    #[test]
    fn test_blank_text_clears_answered_flag() {
        let mut state = started(false);
        state.update_answer("q3", AnswerUpdate::text("draft"));
        assert!(state.answer("q3").unwrap().is_answered);

        state.update_answer("q3", AnswerUpdate::text("   "));
        assert!(!state.answer("q3").unwrap().is_answered);
        assert_eq!(state.answered_count(), 0);
    }

    #[test]
    fn test_unknown_question_is_noop() {
        let mut state = started(false);
        let before = state.answers().to_vec();

        assert!(!state.update_answer("missing", AnswerUpdate::select("a1")));
        assert!(!state.toggle_flag("missing"));
        assert_eq!(state.answers(), before.as_slice());
    }

    #[test]
    fn test_unoffered_selection_is_ignored() {
        let mut state = started(false);
        assert!(!state.update_answer("q1", AnswerUpdate::select("zz")));
        assert!(!state.answer("q1").unwrap().is_answered);
    }

    #[test]
    fn test_flag_is_independent_of_answer() {
        let mut state = started(false);
        assert!(state.toggle_flag("q2"));
        assert_eq!(state.flagged_count(), 1);
        assert_eq!(state.answered_count(), 0);

        assert!(state.toggle_flag("q2"));
        assert_eq!(state.flagged_count(), 0);
    }

    #[test]
    fn test_forward_only_navigation() {
        let mut state = started(true);
        assert!(state.navigate_to(3));
        assert!(!state.navigate_to(1));
        assert_eq!(state.current_index(), 3);
        assert!(state.navigate_to(5));
        assert_eq!(state.current_index(), 5);
        assert!(!state.navigate_to(6));
        assert_eq!(state.current_index(), 5);
    }

    #[test]
    fn test_free_navigation() {
        let mut state = started(false);
        assert!(state.navigate_to(4));
        assert!(state.navigate_to(0));
        assert_eq!(state.current_index(), 0);
    }

    #[test]
    fn test_answered_count_matches_records_for_mixed_sequence() {
        let mut state = started(false);
        let ops: Vec<(&str, AnswerUpdate)> = vec![
            ("q1", AnswerUpdate::select("a2")),
            ("q2", AnswerUpdate::text("  ")),
            ("q3", AnswerUpdate::text("essay")),
            ("q4", AnswerUpdate::select("a1")),
            ("q5", AnswerUpdate::text("x")),
            ("q5", AnswerUpdate::text("")),
            ("nope", AnswerUpdate::select("a1")),
        ];
        for (index, (question_id, update)) in ops.into_iter().enumerate() {
            state.update_answer(question_id, update);
            if index % 2 == 0 {
                state.toggle_flag(question_id);
            }
            assert!(state.answered_count() <= state.question_count());
            let expected = state
                .answers()
                .iter()
                .filter(|r| {
                    r.selected_answer_id.as_deref().is_some_and(|s| !s.is_empty())
                        || r.text_answer.as_deref().is_some_and(|t| !t.trim().is_empty())
                })
                .count();
            assert_eq!(state.answered_count(), expected);
        }
        assert_eq!(state.answered_count(), 3);
    }

    #[test]
    fn test_restore_rejects_mismatched_slot() {
        let mut state = started(false);
        state.update_answer("q1", AnswerUpdate::select("a1"));
        let mut slot = state.to_persisted(None, Utc::now());
        slot.answers.pop();

        assert!(AttemptState::restore(&assignment(false), &questions(), &slot, Utc::now()).is_none());
    }

    #[test]
    fn test_restore_keeps_records_verbatim() {
        let mut state = started(true);
        state.update_answer("q1", AnswerUpdate::select("a1"));
        state.update_answer("q2", AnswerUpdate::text("42"));
        state.toggle_flag("q3");
        state.navigate_to(2);
        let slot = state.to_persisted(Some(30), Utc::now());

        let restored =
            AttemptState::restore(&assignment(true), &questions(), &slot, Utc::now()).unwrap();
        assert_eq!(restored.answers(), state.answers());
        assert_eq!(restored.started_at(), state.started_at());
        assert_eq!(restored.current_index(), 2);
        assert_eq!(restored.flagged_count(), 1);
    }
}
