use std::sync::Arc;

use crate::config::TimerSettings;
use crate::error::{AttemptError, Result};
use crate::metrics::{record_autosave, record_submission, ATTEMPTS_STARTED_TOTAL};
use crate::models::{
    AnswerUpdate, Assignment, AttemptContext, AttemptLifecycle, AttemptSnapshot, SubmitReason,
    SubmitResponse,
};
use crate::services::api_client::AssignmentApi;
use crate::services::attempt_state::AttemptState;
use crate::services::attempt_store::AttemptStore;
use crate::services::countdown::{Countdown, TickOutcome};
use crate::services::submission::{
    build_payload, PendingSubmission, SubmissionCoordinator, SubmissionOutcome,
};
use crate::utils::clock::Clock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartMode {
    Fresh,
    Resumed,
    /// A saved slot existed but did not match the question set.
    DiscardedStale,
}

impl StartMode {
    pub fn as_str(self) -> &'static str {
        match self {
            StartMode::Fresh => "fresh",
            StartMode::Resumed => "resumed",
            StartMode::DiscardedStale => "stale",
        }
    }
}

/// One student's attempt at one assignment.
///
/// Owns the answer state, the countdown and the submission guard, and writes
/// through to the attempt store after every change. Methods take `&mut self`;
/// whoever owns the session serialises events onto it.
pub struct AttemptSession {
    assignment: Assignment,
    state: AttemptState,
    countdown: Countdown,
    submission: SubmissionCoordinator,
    store: Arc<dyn AttemptStore>,
    clock: Arc<dyn Clock>,
    start_mode: StartMode,
}

impl AttemptSession {
    /// Starts a new attempt or resumes the one saved for this assignment.
    pub async fn start(
        context: AttemptContext,
        store: Arc<dyn AttemptStore>,
        clock: Arc<dyn Clock>,
        timer: &TimerSettings,
    ) -> Result<Self> {
        let AttemptContext {
            assignment,
            questions,
        } = context;
        let now = clock.now();
        let budget = assignment.time_budget_seconds();

        let saved = store.load(&assignment.id).await?;
        let restored = saved.as_ref().and_then(|slot| {
            AttemptState::restore(&assignment, &questions, slot, now)
                .map(|state| (state, slot.time_remaining))
        });

        let (mut state, saved_remaining, start_mode) = match (saved.is_some(), restored) {
            (_, Some((state, remaining))) => (state, remaining, StartMode::Resumed),
            (true, None) => (
                AttemptState::initialize(&assignment, &questions, now),
                None,
                StartMode::DiscardedStale,
            ),
            (false, None) => (
                AttemptState::initialize(&assignment, &questions, now),
                None,
                StartMode::Fresh,
            ),
        };

        let countdown = Countdown::resume(
            budget,
            saved_remaining,
            state.started_at(),
            now,
            timer.autosave_every_ticks,
        );
        state.set_lifecycle(AttemptLifecycle::InProgress);

        ATTEMPTS_STARTED_TOTAL
            .with_label_values(&[start_mode.as_str()])
            .inc();
        tracing::info!(
            "Attempt {} for assignment {}: {} questions, {} answered, remaining={:?}",
            start_mode.as_str(),
            assignment.id,
            state.question_count(),
            state.answered_count(),
            countdown.remaining()
        );
        if countdown.is_expired() {
            tracing::info!(
                "Time already expired for assignment {}, submission required",
                assignment.id
            );
        }

        let session = Self {
            assignment,
            state,
            countdown,
            submission: SubmissionCoordinator::new(),
            store,
            clock,
            start_mode,
        };
        session.persist("start").await;
        Ok(session)
    }

    pub fn assignment(&self) -> &Assignment {
        &self.assignment
    }

    pub fn assignment_id(&self) -> &str {
        &self.assignment.id
    }

    pub fn state(&self) -> &AttemptState {
        &self.state
    }

    pub fn countdown(&self) -> &Countdown {
        &self.countdown
    }

    pub fn start_mode(&self) -> StartMode {
        self.start_mode
    }

    pub fn lifecycle(&self) -> AttemptLifecycle {
        self.state.lifecycle()
    }

    pub fn time_remaining(&self) -> Option<u32> {
        self.countdown.remaining()
    }

    /// True when time ran out with no submission pending, e.g. an attempt
    /// resumed after its deadline. The owner must submit with
    /// `SubmitReason::Timeout`.
    pub fn needs_timeout_submit(&self) -> bool {
        self.countdown.is_expired() && self.state.is_in_progress()
    }

    /// Whether the tick source should keep firing.
    pub fn timer_active(&self) -> bool {
        self.countdown.is_running() && self.state.is_in_progress()
    }

    pub fn snapshot(&self) -> AttemptSnapshot {
        AttemptSnapshot {
            assignment_id: self.assignment.id.clone(),
            current_index: self.state.current_index(),
            question_count: self.state.question_count(),
            answered_count: self.state.answered_count(),
            flagged_count: self.state.flagged_count(),
            time_remaining: self.countdown.remaining(),
            lifecycle: self.state.lifecycle(),
        }
    }

    pub async fn update_answer(&mut self, question_id: &str, update: AnswerUpdate) -> bool {
        if self.time_is_up() {
            return false;
        }
        let changed = self.state.update_answer(question_id, update);
        if changed {
            self.persist("mutation").await;
        }
        changed
    }

    pub async fn toggle_flag(&mut self, question_id: &str) -> bool {
        if self.time_is_up() {
            return false;
        }
        let changed = self.state.toggle_flag(question_id);
        if changed {
            self.persist("mutation").await;
        }
        changed
    }

    pub async fn navigate_to(&mut self, index: usize) -> bool {
        if self.time_is_up() {
            return false;
        }
        let moved = self.state.navigate_to(index);
        if moved {
            self.persist("mutation").await;
        }
        moved
    }

    pub async fn next(&mut self) -> bool {
        let target = self.state.current_index() + 1;
        self.navigate_to(target).await
    }

    pub async fn previous(&mut self) -> bool {
        match self.state.current_index().checked_sub(1) {
            Some(target) => self.navigate_to(target).await,
            None => false,
        }
    }

    /// Advances the countdown by one second. Ticks are ignored unless the
    /// attempt is in progress, so a tick racing an in-flight submission is
    /// harmless. `TickOutcome::Expired` means the caller must force a
    /// timeout submission.
    pub async fn tick(&mut self) -> TickOutcome {
        if !self.state.is_in_progress() {
            return TickOutcome::Idle;
        }

        let outcome = self.countdown.tick();
        match outcome {
            TickOutcome::Running { persist: true, .. } => self.persist("timer").await,
            TickOutcome::Expired => {
                tracing::info!("Time expired for assignment {}", self.assignment.id);
                self.persist("timer").await;
            }
            _ => {}
        }
        outcome
    }

    /// Passes the in-flight guard and freezes the payload. The slot is
    /// flushed first so nothing typed before the submit can be lost.
    pub async fn begin_submission(&mut self, reason: SubmitReason) -> Result<PendingSubmission> {
        match self.state.lifecycle() {
            AttemptLifecycle::Submitted => return Err(AttemptError::AlreadySubmitted),
            AttemptLifecycle::NotStarted => return Err(AttemptError::NotInProgress),
            AttemptLifecycle::InProgress | AttemptLifecycle::Submitting => {}
        }
        self.submission.begin(reason)?;

        self.persist("submit").await;
        let request = build_payload(&self.state, self.clock.now());
        self.state.set_lifecycle(AttemptLifecycle::Submitting);

        tracing::info!(
            "Submitting assignment {} ({}): {} of {} answered",
            self.assignment.id,
            reason.as_str(),
            request.answers.len(),
            self.state.question_count()
        );

        Ok(PendingSubmission::new(
            self.assignment.id.clone(),
            reason,
            request,
            self.store.clone(),
        ))
    }

    /// Applies the result of a submission that went through `begin_submission`.
    pub fn complete_submission(&mut self, outcome: SubmissionOutcome) -> Result<SubmitResponse> {
        let SubmissionOutcome { reason, result } = outcome;

        if self.state.lifecycle() != AttemptLifecycle::Submitting {
            tracing::warn!(
                "Late submission result for assignment {} in state {:?}",
                self.assignment.id,
                self.state.lifecycle()
            );
            return match result {
                Ok(_) => Err(AttemptError::AlreadySubmitted),
                Err(e) => Err(e),
            };
        }

        match result {
            Ok(response) => {
                self.submission.succeed();
                self.countdown.stop();
                self.state.set_lifecycle(AttemptLifecycle::Submitted);
                record_submission(reason.as_str(), "success");
                tracing::info!(
                    "Assignment {} submitted ({}), submission id {:?}",
                    self.assignment.id,
                    reason.as_str(),
                    response.submission.as_ref().map(|s| s.id.as_str())
                );
                Ok(response)
            }
            Err(e) => {
                self.submission.fail();
                self.state.set_lifecycle(AttemptLifecycle::InProgress);
                record_submission(reason.as_str(), "failure");
                Err(e)
            }
        }
    }

    /// Submits and waits for the backend in one step.
    pub async fn submit(
        &mut self,
        reason: SubmitReason,
        api: Arc<dyn AssignmentApi>,
    ) -> Result<SubmitResponse> {
        let pending = self.begin_submission(reason).await?;
        let outcome = pending.send(api).await;
        self.complete_submission(outcome)
    }

    fn time_is_up(&self) -> bool {
        if self.countdown.is_expired() {
            tracing::debug!(
                "Ignoring edit on assignment {}: time is up",
                self.assignment.id
            );
            return true;
        }
        false
    }

    /// Writes the slot. Failures are logged and counted, never raised: the
    /// in-memory state stays authoritative and the next write retries.
    async fn persist(&self, trigger: &str) {
        if self.state.lifecycle() == AttemptLifecycle::Submitted {
            return;
        }

        let slot = self
            .state
            .to_persisted(self.countdown.remaining(), self.clock.now());
        match self.store.save(&self.assignment.id, &slot).await {
            Ok(()) => {
                record_autosave(trigger, true);
                tracing::debug!(
                    "Saved attempt slot for {} ({}), remaining={:?}",
                    self.assignment.id,
                    trigger,
                    slot.time_remaining
                );
            }
            Err(e) => {
                record_autosave(trigger, false);
                tracing::warn!(
                    "Failed to save attempt slot for {} ({}): {}",
                    self.assignment.id,
                    trigger,
                    e
                );
            }
        }
    }
}
