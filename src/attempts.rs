//! Failed login bookkeeping for brute-force detection
//!
//! Kept apart from the activity log so that request traffic from other users
//! can never push a user's failures out before they are counted.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::collections::VecDeque;
use uuid::Uuid;

/// Sliding window of failed login timestamps per user
#[derive(Debug, Default)]
pub struct FailedLoginWindow {
    attempts: DashMap<Uuid, VecDeque<DateTime<Utc>>>,
}

impl FailedLoginWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure at `at`; returns the failures within `window` of it
    pub fn record(&self, user_id: Uuid, at: DateTime<Utc>, window: Duration) -> usize {
        let mut attempts = self.attempts.entry(user_id).or_default();
        attempts.push_back(at);
        drop_before(&mut attempts, at - window);
        attempts.len()
    }

    /// Failures recorded for the user at or after `since`
    pub fn count_since(&self, user_id: Uuid, since: DateTime<Utc>) -> usize {
        self.attempts
            .get(&user_id)
            .map_or(0, |attempts| attempts.iter().filter(|t| **t >= since).count())
    }

    /// Forget failures older than `cutoff`; returns how many users were dropped
    pub fn prune(&self, cutoff: DateTime<Utc>) -> usize {
        let before = self.attempts.len();
        self.attempts.retain(|_, attempts| {
            drop_before(attempts, cutoff);
            !attempts.is_empty()
        });
        before.saturating_sub(self.attempts.len())
    }

    /// Users with failures on record
    pub fn len(&self) -> usize {
        self.attempts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }
}

fn drop_before(attempts: &mut VecDeque<DateTime<Utc>>, cutoff: DateTime<Utc>) {
    while attempts.front().map_or(false, |t| *t < cutoff) {
        attempts.pop_front();
    }
}
