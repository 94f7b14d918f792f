//! Foreground activity tracking
//!
//! The memory system records every foreground call here. Device monitors
//! use the idle time to fill in [`DeviceState::idle`](super::DeviceState).

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Window used for the activity rate
const DEFAULT_ACTIVITY_WINDOW_SECS: i64 = 300;

/// Timestamps kept for the rate calculation
const MAX_LOG_SIZE: usize = 1000;

/// Tracks foreground activity to detect idle periods
#[derive(Debug, Clone)]
pub struct ActivityTracker {
    activity_log: VecDeque<DateTime<Utc>>,
    activity_window: Duration,
    /// Idle time is measured from here until the first activity
    started_at: DateTime<Utc>,
}

impl Default for ActivityTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ActivityTracker {
    pub fn new() -> Self {
        Self {
            activity_log: VecDeque::with_capacity(64),
            activity_window: Duration::seconds(DEFAULT_ACTIVITY_WINDOW_SECS),
            started_at: Utc::now(),
        }
    }

    pub fn record_activity(&mut self) {
        self.record_activity_at(Utc::now());
    }

    pub fn record_activity_at(&mut self, at: DateTime<Utc>) {
        self.activity_log.push_back(at);
        while self.activity_log.len() > MAX_LOG_SIZE {
            self.activity_log.pop_front();
        }
    }

    pub fn last_activity(&self) -> Option<DateTime<Utc>> {
        self.activity_log.back().copied()
    }

    /// Time since the last activity, or since tracking started
    pub fn idle_for(&self, now: DateTime<Utc>) -> Duration {
        let since = self.last_activity().unwrap_or(self.started_at);
        (now - since).max(Duration::zero())
    }

    /// Events per minute in the recent window
    pub fn activity_rate(&self, now: DateTime<Utc>) -> f64 {
        let window_start = now - self.activity_window;
        let recent = self
            .activity_log
            .iter()
            .filter(|&&t| t >= window_start)
            .count();

        let window_minutes = self.activity_window.num_seconds() as f64 / 60.0;
        if window_minutes > 0.0 {
            recent as f64 / window_minutes
        } else {
            0.0
        }
    }

    pub fn stats(&self, now: DateTime<Utc>) -> ActivityStats {
        ActivityStats {
            total_events: self.activity_log.len(),
            events_per_minute: self.activity_rate(now),
            last_activity: self.last_activity(),
            idle_seconds: self.idle_for(now).num_seconds(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityStats {
    pub total_events: usize,
    pub events_per_minute: f64,
    pub last_activity: Option<DateTime<Utc>>,
    pub idle_seconds: i64,
}
