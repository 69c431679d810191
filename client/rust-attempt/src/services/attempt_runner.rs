use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::error::{AttemptError, Result};
use crate::metrics::ATTEMPTS_ACTIVE;
use crate::models::timer::{
    AttemptEvent, Autosaved, SubmissionFailed, SubmissionStarted, Submitted, TimeExpired,
    TimerTick,
};
use crate::models::{AnswerUpdate, AttemptSnapshot, SubmitReason, SubmitResponse};
use crate::services::api_client::AssignmentApi;
use crate::services::attempt_session::AttemptSession;
use crate::services::countdown::TickOutcome;
use crate::services::submission::SubmissionOutcome;

const COMMAND_BUFFER: usize = 32;
const EVENT_BUFFER: usize = 128;

enum AttemptCommand {
    UpdateAnswer {
        question_id: String,
        update: AnswerUpdate,
        reply: oneshot::Sender<bool>,
    },
    ToggleFlag {
        question_id: String,
        reply: oneshot::Sender<bool>,
    },
    NavigateTo {
        index: usize,
        reply: oneshot::Sender<bool>,
    },
    Next {
        reply: oneshot::Sender<bool>,
    },
    Previous {
        reply: oneshot::Sender<bool>,
    },
    Submit {
        reply: oneshot::Sender<Result<SubmitResponse>>,
    },
    Snapshot {
        reply: oneshot::Sender<AttemptSnapshot>,
    },
}

/// Caller side of a running attempt. Dropping it (or calling `shutdown`)
/// stops the timer; a submission already on the wire still completes.
pub struct AttemptHandle {
    commands: mpsc::Sender<AttemptCommand>,
    events: broadcast::Sender<AttemptEvent>,
    task: JoinHandle<AttemptSnapshot>,
}

impl AttemptHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<AttemptEvent> {
        self.events.subscribe()
    }

    pub async fn update_answer(&self, question_id: impl Into<String>, update: AnswerUpdate) -> bool {
        let question_id = question_id.into();
        self.request(|reply| AttemptCommand::UpdateAnswer {
            question_id,
            update,
            reply,
        })
        .await
        .unwrap_or(false)
    }

    pub async fn toggle_flag(&self, question_id: impl Into<String>) -> bool {
        let question_id = question_id.into();
        self.request(|reply| AttemptCommand::ToggleFlag { question_id, reply })
            .await
            .unwrap_or(false)
    }

    pub async fn navigate_to(&self, index: usize) -> bool {
        self.request(|reply| AttemptCommand::NavigateTo { index, reply })
            .await
            .unwrap_or(false)
    }

    pub async fn next(&self) -> bool {
        self.request(|reply| AttemptCommand::Next { reply })
            .await
            .unwrap_or(false)
    }

    pub async fn previous(&self) -> bool {
        self.request(|reply| AttemptCommand::Previous { reply })
            .await
            .unwrap_or(false)
    }

    /// User-initiated submit. Resolves once the backend has answered.
    pub async fn submit(&self) -> Result<SubmitResponse> {
        self.request(|reply| AttemptCommand::Submit { reply })
            .await
            .unwrap_or(Err(AttemptError::NotInProgress))
    }

    pub async fn snapshot(&self) -> Option<AttemptSnapshot> {
        self.request(|reply| AttemptCommand::Snapshot { reply }).await
    }

    /// Stops the runner and returns the final view of the attempt.
    pub async fn shutdown(self) -> Option<AttemptSnapshot> {
        let AttemptHandle { commands, task, .. } = self;
        drop(commands);
        task.await.ok()
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> AttemptCommand,
    ) -> Option<T> {
        let (reply, response) = oneshot::channel();
        if self.commands.send(build(reply)).await.is_err() {
            tracing::debug!("Attempt runner already stopped");
            return None;
        }
        response.await.ok()
    }
}

/// Drives an `AttemptSession` on its own task: commands and timer ticks are
/// handled one at a time, in arrival order.
pub struct AttemptRunner {
    session: AttemptSession,
    api: Arc<dyn AssignmentApi>,
    events: broadcast::Sender<AttemptEvent>,
    done_tx: mpsc::Sender<SubmissionOutcome>,
    pending_reply: Option<oneshot::Sender<Result<SubmitResponse>>>,
}

impl AttemptRunner {
    pub fn spawn(
        session: AttemptSession,
        api: Arc<dyn AssignmentApi>,
        tick_interval: Duration,
    ) -> AttemptHandle {
        let (commands, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let (done_tx, done_rx) = mpsc::channel(1);

        let runner = AttemptRunner {
            session,
            api,
            events: events.clone(),
            done_tx,
            pending_reply: None,
        };
        let task = tokio::spawn(runner.run(command_rx, done_rx, tick_interval));

        AttemptHandle {
            commands,
            events,
            task,
        }
    }

    async fn run(
        mut self,
        mut commands: mpsc::Receiver<AttemptCommand>,
        mut done_rx: mpsc::Receiver<SubmissionOutcome>,
        tick_interval: Duration,
    ) -> AttemptSnapshot {
        ATTEMPTS_ACTIVE.inc();
        tracing::info!(
            "Attempt runner started for {} (tick {}ms)",
            self.session.assignment_id(),
            tick_interval.as_millis()
        );

        let mut ticker = interval_at(Instant::now() + tick_interval, tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // resumed past the deadline: no tick will ever report expiry
        if self.session.needs_timeout_submit() {
            self.expire().await;
        }

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                Some(outcome) = done_rx.recv() => self.handle_outcome(outcome),
                _ = ticker.tick(), if self.session.timer_active() => self.handle_tick().await,
            }
        }

        ATTEMPTS_ACTIVE.dec();
        tracing::info!(
            "Attempt runner stopped for {} in state {:?}",
            self.session.assignment_id(),
            self.session.lifecycle()
        );
        self.session.snapshot()
    }

    async fn handle_command(&mut self, command: AttemptCommand) {
        match command {
            AttemptCommand::UpdateAnswer {
                question_id,
                update,
                reply,
            } => {
                let changed = self.session.update_answer(&question_id, update).await;
                let _ = reply.send(changed);
            }
            AttemptCommand::ToggleFlag { question_id, reply } => {
                let changed = self.session.toggle_flag(&question_id).await;
                let _ = reply.send(changed);
            }
            AttemptCommand::NavigateTo { index, reply } => {
                let moved = self.session.navigate_to(index).await;
                let _ = reply.send(moved);
            }
            AttemptCommand::Next { reply } => {
                let moved = self.session.next().await;
                let _ = reply.send(moved);
            }
            AttemptCommand::Previous { reply } => {
                let moved = self.session.previous().await;
                let _ = reply.send(moved);
            }
            AttemptCommand::Submit { reply } => {
                if let Err(e) = self.dispatch_submission(SubmitReason::User).await {
                    let _ = reply.send(Err(e));
                } else {
                    self.pending_reply = Some(reply);
                }
            }
            AttemptCommand::Snapshot { reply } => {
                let _ = reply.send(self.session.snapshot());
            }
        }
    }

    async fn handle_tick(&mut self) {
        let outcome = self.session.tick().await;
        let assignment_id = self.session.assignment_id().to_string();

        match outcome {
            TickOutcome::Idle => {}
            TickOutcome::Running { remaining, persist } => {
                let countdown = self.session.countdown();
                self.publish(AttemptEvent::TimerTick(TimerTick {
                    assignment_id: assignment_id.clone(),
                    remaining_seconds: remaining,
                    elapsed_seconds: countdown.elapsed().unwrap_or(0),
                    total_seconds: countdown.total_seconds().unwrap_or(0),
                    timestamp: Utc::now(),
                }));
                if persist {
                    self.publish(AttemptEvent::Autosaved(Autosaved {
                        assignment_id,
                        timestamp: Utc::now(),
                    }));
                }
            }
            TickOutcome::Expired => self.expire().await,
        }
    }

    async fn expire(&mut self) {
        self.publish(AttemptEvent::TimeExpired(TimeExpired {
            assignment_id: self.session.assignment_id().to_string(),
            timestamp: Utc::now(),
            message: "Time limit reached, submitting answers".to_string(),
        }));
        if let Err(e) = self.dispatch_submission(SubmitReason::Timeout).await {
            tracing::warn!("Automatic submission could not start: {}", e);
        }
    }

    /// Starts a submission on a detached task so that tearing down the
    /// runner never cancels a request that is already on the wire.
    async fn dispatch_submission(&mut self, reason: SubmitReason) -> Result<()> {
        let pending = self.session.begin_submission(reason).await?;

        self.publish(AttemptEvent::SubmissionStarted(SubmissionStarted {
            assignment_id: pending.assignment_id.clone(),
            reason,
            timestamp: Utc::now(),
        }));

        let api = self.api.clone();
        let done_tx = self.done_tx.clone();
        tokio::spawn(async move {
            let outcome = pending.send(api).await;
            if done_tx.send(outcome).await.is_err() {
                tracing::debug!("Submission finished after its attempt runner stopped");
            }
        });
        Ok(())
    }

    fn handle_outcome(&mut self, outcome: SubmissionOutcome) {
        let reason = outcome.reason;
        let assignment_id = self.session.assignment_id().to_string();
        let result = self.session.complete_submission(outcome);

        match &result {
            Ok(response) => self.publish(AttemptEvent::Submitted(Submitted {
                assignment_id,
                reason,
                submission: response.submission.clone(),
                show_correct_answers: response.show_correct_answers,
                timestamp: Utc::now(),
            })),
            Err(e) => self.publish(AttemptEvent::SubmissionFailed(SubmissionFailed {
                assignment_id,
                reason,
                message: e.to_string(),
                retryable: e.is_retryable(),
                timestamp: Utc::now(),
            })),
        }

        if let Some(reply) = self.pending_reply.take() {
            let _ = reply.send(result);
        }
    }

    fn publish(&self, event: AttemptEvent) {
        tracing::trace!("Attempt event: {}", event.event_name());
        // no subscribers is fine
        let _ = self.events.send(event);
    }
}
