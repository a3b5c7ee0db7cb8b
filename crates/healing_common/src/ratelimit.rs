//! Sliding-window rate limiter, one window per action.
//!
//! Each action keeps the instants of its admitted invocations. On every check
//! entries older than the window are pruned; the call is admitted and recorded
//! only while fewer than `max_requests` remain. Rejected calls are not recorded.

use crate::action::ActionName;
use crate::config::RateLimitConfig;
use crate::error::{HealingError, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Source of monotonic time for the limiter
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> Instant {
        (**self).now()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.offset.lock().unwrap_or_else(PoisonError::into_inner) += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + *self.offset.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    clock: Box<dyn Clock>,
    windows: Mutex<HashMap<ActionName, Vec<Instant>>>,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self::with_clock(config, Box::new(SystemClock))
    }

    pub fn with_clock(config: &RateLimitConfig, clock: Box<dyn Clock>) -> Self {
        Self {
            max_requests: config.max_requests as usize,
            window: Duration::from_secs(config.window_secs),
            clock,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Admit and record one invocation of `action`, or reject it.
    pub fn check_and_record(&self, action: ActionName) -> Result<()> {
        let now = self.clock.now();
        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
        let entries = windows.entry(action).or_default();

        entries.retain(|&t| now.saturating_duration_since(t) < self.window);

        if entries.len() >= self.max_requests {
            return Err(HealingError::RateLimitExceeded {
                action: action.as_str().to_string(),
            });
        }

        entries.push(now);
        Ok(())
    }

    /// Invocations of `action` currently inside the window
    pub fn usage(&self, action: ActionName) -> usize {
        let now = self.clock.now();
        self.windows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&action)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|&&t| now.saturating_duration_since(t) < self.window)
                    .count()
            })
            .unwrap_or(0)
    }

    pub fn max_requests(&self) -> usize {
        self.max_requests
    }
}
