use chrono::{DateTime, Utc};

use crate::utils::time::elapsed_seconds;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountdownState {
    /// Untimed quiz, or the attempt left `in_progress` for good.
    Inactive,
    Running,
    /// Reached zero. Terminal: no further tick ever fires again.
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Countdown is not running; nothing happened.
    Idle,
    Running { remaining: u32, persist: bool },
    /// Remaining time just hit zero. Reported exactly once.
    Expired,
}

/// One-second countdown for timed attempts.
///
/// Remaining time only ever decreases. Every `autosave_every` ticks the
/// outcome asks the caller to persist, so a crash loses at most that many
/// seconds of timer progress.
#[derive(Debug, Clone)]
pub struct Countdown {
    state: CountdownState,
    total_seconds: Option<u32>,
    remaining: Option<u32>,
    autosave_every: u32,
    ticks_since_save: u32,
}

impl Countdown {
    pub fn untimed() -> Self {
        Self {
            state: CountdownState::Inactive,
            total_seconds: None,
            remaining: None,
            autosave_every: 1,
            ticks_since_save: 0,
        }
    }

    /// A countdown with nothing left starts out `Expired`; its owner must
    /// submit straight away since no tick will ever report it.
    pub fn new(total_seconds: u32, remaining: u32, autosave_every: u32) -> Self {
        let remaining = remaining.min(total_seconds);
        let state = if remaining == 0 {
            CountdownState::Expired
        } else {
            CountdownState::Running
        };

        Self {
            state,
            total_seconds: Some(total_seconds),
            remaining: Some(remaining),
            autosave_every: autosave_every.max(1),
            ticks_since_save: 0,
        }
    }

    /// Builds the countdown for an attempt being started or resumed.
    ///
    /// A saved counter is trusted as-is. Without one, remaining time is
    /// recomputed from wall-clock time elapsed since `started_at`.
    pub fn resume(
        budget_seconds: Option<u32>,
        saved_remaining: Option<u32>,
        started_at: DateTime<Utc>,
        now: DateTime<Utc>,
        autosave_every: u32,
    ) -> Self {
        let Some(budget) = budget_seconds else {
            return Self::untimed();
        };

        let remaining = match saved_remaining {
            Some(saved) => saved,
            None => {
                let elapsed = elapsed_seconds(started_at, now);
                (budget as u64).saturating_sub(elapsed) as u32
            }
        };

        Self::new(budget, remaining, autosave_every)
    }

    pub fn state(&self) -> CountdownState {
        self.state
    }

    pub fn remaining(&self) -> Option<u32> {
        self.remaining
    }

    pub fn total_seconds(&self) -> Option<u32> {
        self.total_seconds
    }

    pub fn elapsed(&self) -> Option<u32> {
        Some(self.total_seconds?.saturating_sub(self.remaining?))
    }

    pub fn is_running(&self) -> bool {
        self.state == CountdownState::Running
    }

    pub fn is_expired(&self) -> bool {
        self.state == CountdownState::Expired
    }

    pub fn tick(&mut self) -> TickOutcome {
        if self.state != CountdownState::Running {
            return TickOutcome::Idle;
        }

        let remaining = self.remaining.unwrap_or(0).saturating_sub(1);
        self.remaining = Some(remaining);

        if remaining == 0 {
            self.state = CountdownState::Expired;
            self.ticks_since_save = 0;
            return TickOutcome::Expired;
        }

        self.ticks_since_save += 1;
        let persist = self.ticks_since_save >= self.autosave_every;
        if persist {
            self.ticks_since_save = 0;
        }

        TickOutcome::Running { remaining, persist }
    }

    /// Permanently stops the countdown. Used once the attempt is submitted.
    pub fn stop(&mut self) {
        if self.state == CountdownState::Running {
            self.state = CountdownState::Inactive;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_untimed_never_ticks() {
        let mut countdown = Countdown::untimed();
        assert_eq!(countdown.tick(), TickOutcome::Idle);
        assert_eq!(countdown.remaining(), None);
    }

    #[test]
    fn test_expires_after_budget_ticks_exactly_once() {
        let budget = 60;
        let mut countdown = Countdown::new(budget, budget, 10);
        let mut expirations = 0;

        for _ in 0..budget + 5 {
            if countdown.tick() == TickOutcome::Expired {
                expirations += 1;
            }
        }

        assert_eq!(expirations, 1);
        assert_eq!(countdown.state(), CountdownState::Expired);
        assert_eq!(countdown.remaining(), Some(0));
    }

    #[test]
    fn test_persist_every_ten_ticks() {
        let mut countdown = Countdown::new(100, 100, 10);
        let persisted: Vec<u32> = (0..30)
            .filter_map(|_| match countdown.tick() {
                TickOutcome::Running {
                    remaining,
                    persist: true,
                } => Some(remaining),
                _ => None,
            })
            .collect();

        assert_eq!(persisted, vec![90, 80, 70]);
    }

    #[test]
    fn test_resume_trusts_saved_counter() {
        let now = Utc::now();
        let countdown = Countdown::resume(Some(600), Some(500), now - Duration::seconds(400), now, 10);
        assert_eq!(countdown.remaining(), Some(500));
    }

    #[test]
    fn test_resume_recomputes_from_wall_clock() {
        let now = Utc::now();
        let countdown = Countdown::resume(Some(600), None, now - Duration::seconds(400), now, 10);
        assert_eq!(countdown.remaining(), Some(200));

        let overdue = Countdown::resume(Some(600), None, now - Duration::seconds(4000), now, 10);
        assert_eq!(overdue.remaining(), Some(0));
        assert!(overdue.is_expired());
        assert!(!overdue.is_running());
    }

    #[test]
    fn test_zero_remaining_starts_expired() {
        let mut countdown = Countdown::new(60, 0, 10);
        assert_eq!(countdown.state(), CountdownState::Expired);
        assert_eq!(countdown.elapsed(), Some(60));
        assert_eq!(countdown.tick(), TickOutcome::Idle);
    }

    #[test]
    fn test_saved_zero_counter_resumes_expired() {
        let now = Utc::now();
        let countdown = Countdown::resume(Some(60), Some(0), now, now, 10);
        assert!(countdown.is_expired());
    }

    #[test]
    fn test_stop_is_permanent() {
        let mut countdown = Countdown::new(60, 30, 10);
        countdown.stop();
        assert_eq!(countdown.state(), CountdownState::Inactive);
        assert_eq!(countdown.tick(), TickOutcome::Idle);
        assert_eq!(countdown.remaining(), Some(30));
    }
}
