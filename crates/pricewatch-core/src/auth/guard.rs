//! Error-loop guard.
//!
//! Counts classified failures per category and stops invoking the handler
//! once a category trips, so a server answering every request with 401 cannot
//! drive an unbounded handle-and-retry loop. Tripping resets the counter.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

/// Category for credential rejections observed by the transport.
pub const CATEGORY_AUTH_401: &str = "auth_401";

/// Result of a guarded invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attempt<T> {
    Ran(T),
    Suppressed,
}

impl<T> Attempt<T> {
    pub fn is_suppressed(&self) -> bool {
        matches!(self, Attempt::Suppressed)
    }

    pub fn into_option(self) -> Option<T> {
        match self {
            Attempt::Ran(value) => Some(value),
            Attempt::Suppressed => None,
        }
    }
}

/// Clone is cheap; clones share counters.
#[derive(Clone)]
pub struct ErrorLoopGuard {
    counts: Arc<Mutex<HashMap<String, u32>>>,
    threshold: u32,
}

impl ErrorLoopGuard {
    pub fn new(threshold: u32) -> Self {
        Self {
            counts: Arc::new(Mutex::new(HashMap::new())),
            threshold,
        }
    }

    /// Count one failure in `category` and run `handler` unless the category
    /// has now gone past the threshold, in which case the counter resets and
    /// the handler is skipped.
    pub fn attempt<T, F>(&self, category: &str, handler: F) -> Attempt<T>
    where
        F: FnOnce() -> T,
    {
        let count = {
            let mut counts = self.lock();
            let count = counts.entry(category.to_string()).or_insert(0);
            *count += 1;
            let current = *count;
            if current > self.threshold {
                *count = 0;
            }
            current
        };

        if count > self.threshold {
            warn!(
                category,
                count,
                threshold = self.threshold,
                "Repeated failures, suppressing handler to break the loop"
            );
            return Attempt::Suppressed;
        }

        debug!(category, count, "Guarded handler invoked");
        Attempt::Ran(handler())
    }

    pub fn count(&self, category: &str) -> u32 {
        self.lock().get(category).copied().unwrap_or(0)
    }

    pub fn reset_category(&self, category: &str) {
        self.lock().remove(category);
    }

    pub fn reset_all(&self) {
        self.lock().clear();
        debug!("All error counters reset");
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, u32>> {
        self.counts.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_trips_on_fourth_call_and_recovers() {
        let guard = ErrorLoopGuard::new(3);
        let invoked = Cell::new(0);

        for call in 1..=3 {
            let result = guard.attempt(CATEGORY_AUTH_401, || invoked.set(invoked.get() + 1));
            assert_eq!(result, Attempt::Ran(()), "call {} should run", call);
        }
        assert_eq!(invoked.get(), 3);
        assert_eq!(guard.count(CATEGORY_AUTH_401), 3);

        let fourth = guard.attempt(CATEGORY_AUTH_401, || invoked.set(invoked.get() + 1));
        assert!(fourth.is_suppressed());
        assert_eq!(invoked.get(), 3);
        assert_eq!(guard.count(CATEGORY_AUTH_401), 0);

        let fifth = guard.attempt(CATEGORY_AUTH_401, || invoked.set(invoked.get() + 1));
        assert_eq!(fifth, Attempt::Ran(()));
        assert_eq!(invoked.get(), 4);
        assert_eq!(guard.count(CATEGORY_AUTH_401), 1);
    }

    #[test]
    fn test_categories_are_independent() {
        let guard = ErrorLoopGuard::new(1);
        assert_eq!(guard.attempt("a", || 1), Attempt::Ran(1));
        assert_eq!(guard.attempt("b", || 2), Attempt::Ran(2));
        assert!(guard.attempt("a", || 3).is_suppressed());
        assert!(guard.attempt("b", || 4).is_suppressed());
    }

    #[test]
    fn test_reset_category() {
        let guard = ErrorLoopGuard::new(2);
        guard.attempt("a", || ());
        guard.attempt("a", || ());
        guard.attempt("b", || ());
        guard.reset_category("a");
        assert_eq!(guard.count("a"), 0);
        assert_eq!(guard.count("b"), 1);
        // Fresh budget after a reset
        assert_eq!(guard.attempt("a", || "ran").into_option(), Some("ran"));
    }

    #[test]
    fn test_reset_all() {
        let guard = ErrorLoopGuard::new(3);
        guard.attempt("a", || ());
        guard.attempt("b", || ());
        guard.reset_all();
        assert_eq!(guard.count("a"), 0);
        assert_eq!(guard.count("b"), 0);
    }
}
