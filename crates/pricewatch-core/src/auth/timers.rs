//! Named recurring timers.
//!
//! At most one timer is live per name. Cancellation is cooperative: a timer
//! stops at its next tick boundary and a tick that is already running is
//! allowed to finish, so a task may safely cancel its own timer (for example
//! a refresh tick that ends in logout).

// std::sync::Mutex is fine here, the lock is never held across .await points.
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

struct TimerEntry {
    interval: Duration,
    // Dropping the sender stops the timer loop
    _stop: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

/// Registry of named recurring tasks.
/// Clone is cheap; clones share the same table.
#[derive(Clone, Default)]
pub struct TimerRegistry {
    timers: Arc<Mutex<HashMap<String, TimerEntry>>>,
}

impl TimerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` every `interval`, replacing any timer already under `name`.
    ///
    /// The first tick fires one interval from now. The replacement does not
    /// start ticking until the replaced timer has fully stopped, so two ticks
    /// for the same name never overlap.
    ///
    /// A zero interval is refused and leaves the registry untouched.
    pub fn schedule<F, Fut>(&self, name: &str, interval: Duration, task: F) -> bool
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if interval.is_zero() {
            warn!(timer = name, "Refusing to schedule timer with a zero interval");
            return false;
        }

        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let mut timers = self.lock();
        let previous = timers.remove(name).map(|entry| entry.handle);

        let timer_name = name.to_string();
        let start = Instant::now() + interval;
        let handle = tokio::spawn(async move {
            if let Some(previous) = previous {
                // Replaced timer sees its sender dropped and exits after any running tick
                let _ = previous.await;
            }

            let mut ticker = tokio::time::interval_at(start, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => {
                        debug!(timer = %timer_name, "Timer tick");
                        task().await;
                    }
                }
            }
            debug!(timer = %timer_name, "Timer stopped");
        });

        debug!(timer = name, interval_ms = interval.as_millis() as u64, "Timer scheduled");
        timers.insert(
            name.to_string(),
            TimerEntry {
                interval,
                _stop: stop_tx,
                handle,
            },
        );
        true
    }

    /// Stop the timer under `name`, if any.
    pub fn cancel(&self, name: &str) -> bool {
        let removed = self.lock().remove(name).is_some();
        if removed {
            debug!(timer = name, "Timer cancelled");
        }
        removed
    }

    /// Stop every timer. Safe to call with none registered.
    pub fn cancel_all(&self) {
        let drained: Vec<String> = self.lock().drain().map(|(name, _)| name).collect();
        if !drained.is_empty() {
            debug!(count = drained.len(), timers = ?drained, "All timers cancelled");
        }
    }

    pub fn is_scheduled(&self, name: &str) -> bool {
        self.lock().contains_key(name)
    }

    pub fn interval(&self, name: &str) -> Option<Duration> {
        self.lock().get(name).map(|entry| entry.interval)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, TimerEntry>> {
        self.timers.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// ============================================================================
// Tests
// ============================================================================
