//! Wall-clock budget for one action.
//!
//! The clock stops while a confirmation is pending: how long a person takes
//! to answer is bounded by the confirmation timeout, not by the action's.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

#[derive(Debug)]
struct Clock {
    remaining: Duration,
    paused: usize,
}

#[derive(Debug)]
pub struct ActionDeadline {
    budget: Duration,
    /// When the budget runs out; `None` while paused
    expires_at: watch::Sender<Option<Instant>>,
    clock: Mutex<Clock>,
}

impl ActionDeadline {
    /// Start a running clock with `budget` to spend.
    pub fn start(budget: Duration) -> Arc<Self> {
        let (expires_at, _) = watch::channel(Some(Instant::now() + budget));
        Arc::new(Self {
            budget,
            expires_at,
            clock: Mutex::new(Clock {
                remaining: budget,
                paused: 0,
            }),
        })
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    pub fn is_paused(&self) -> bool {
        self.expires_at.borrow().is_none()
    }

    /// Time left, frozen while paused.
    pub fn remaining(&self) -> Duration {
        let expires_at = *self.expires_at.borrow();
        match expires_at {
            Some(at) => at.saturating_duration_since(Instant::now()),
            None => self.lock().remaining,
        }
    }

    /// Stop the clock until the returned guard is dropped. Pauses nest.
    pub fn pause(self: &Arc<Self>) -> PausedDeadline {
        let mut clock = self.lock();
        if clock.paused == 0 {
            if let Some(at) = self.expires_at.send_replace(None) {
                clock.remaining = at.saturating_duration_since(Instant::now());
            }
        }
        clock.paused += 1;
        PausedDeadline {
            deadline: Arc::clone(self),
        }
    }

    fn resume(&self) {
        let mut clock = self.lock();
        clock.paused = clock.paused.saturating_sub(1);
        if clock.paused == 0 {
            self.expires_at
                .send_replace(Some(Instant::now() + clock.remaining));
        }
    }

    /// Resolves once the budget is spent. Never resolves while paused.
    pub async fn expired(&self) {
        let mut changes = self.expires_at.subscribe();
        loop {
            let current = *changes.borrow_and_update();
            let changed = match current {
                Some(at) if at <= Instant::now() => return,
                Some(at) => tokio::select! {
                    () = tokio::time::sleep_until(at) => Ok(()),
                    changed = changes.changed() => changed,
                },
                None => changes.changed().await,
            };
            if changed.is_err() {
                return std::future::pending().await;
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Clock> {
        self.clock.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Restarts the clock when dropped.
#[derive(Debug)]
pub struct PausedDeadline {
    deadline: Arc<ActionDeadline>,
}

impl Drop for PausedDeadline {
    fn drop(&mut self) {
        self.deadline.resume();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn expires_after_the_budget() {
        let deadline = ActionDeadline::start(Duration::from_secs(2));
        let started = Instant::now();
        deadline.expired().await;
        assert_eq!(started.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn paused_time_is_not_spent() {
        let deadline = ActionDeadline::start(Duration::from_secs(2));
        tokio::time::advance(Duration::from_secs(1)).await;

        let paused = deadline.pause();
        assert!(deadline.is_paused());
        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(deadline.remaining(), Duration::from_secs(1));
        drop(paused);
        assert!(!deadline.is_paused());

        let started = Instant::now();
        deadline.expired().await;
        assert_eq!(started.elapsed(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn waiting_stops_while_paused() {
        let deadline = ActionDeadline::start(Duration::from_secs(1));
        let paused = deadline.pause();
        let waiter = {
            let deadline = Arc::clone(&deadline);
            tokio::spawn(async move { deadline.expired().await })
        };
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(!waiter.is_finished());

        drop(paused);
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert!(waiter.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn nested_pauses_resume_once() {
        let deadline = ActionDeadline::start(Duration::from_secs(1));
        let outer = deadline.pause();
        let inner = deadline.pause();
        drop(inner);
        assert!(deadline.is_paused());
        drop(outer);
        assert!(!deadline.is_paused());
    }
}
