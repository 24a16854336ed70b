//! Derived computations over an entry sequence
//!
//! Pure functions of (entries, current time). Nothing here caches beyond
//! what the caller memoizes on its inputs; in particular the idle value is
//! always a fresh wall-clock delta — any redisplay tick a consumer runs is
//! only a trigger to recompute, never a source of truth.

use std::time::Duration;

use chrono::{DateTime, Utc};
use downlink_protocol::{ContextUsage, EntryType};

use crate::processes::ProcessSet;
use crate::store::{Entry, EntrySnapshot};

/// Most recent context-usage report in the sequence, or None. Scans from
/// the end so the latest occurrence wins, not the first.
pub fn latest_context_usage(entries: &[Entry]) -> Option<&ContextUsage> {
    entries.iter().rev().find_map(|entry| {
        let normalized = entry.as_normalized()?;
        match &normalized.entry_type {
            EntryType::ContextUsage { usage } => Some(usage),
            _ => None,
        }
    })
}

/// Latest timestamp among user-originated entries (messages and feedback).
/// Agent and tool entries never count as activity.
pub fn latest_user_activity(entries: &[Entry]) -> Option<DateTime<Utc>> {
    entries
        .iter()
        .filter_map(Entry::as_normalized)
        .filter(|entry| entry.entry_type.is_user_activity())
        .filter_map(|entry| entry.timestamp)
        .max()
}

/// Idle countdown for one subject.
///
/// The effective baseline is the maximum of the last manual reset and the
/// latest log-derived user activity; neither unconditionally overrides the
/// other, so an out-of-order older log timestamp can never roll the
/// countdown backwards past a manual reset.
#[derive(Debug, Clone)]
pub struct IdleTimer {
    timeout: Duration,
    manual_reset: Option<DateTime<Utc>>,
}

impl IdleTimer {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            manual_reset: None,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Establish a new manual baseline at `now`.
    pub fn reset(&mut self, now: DateTime<Utc>) {
        self.manual_reset = Some(now);
    }

    pub fn baseline(&self, entries: &[Entry]) -> Option<DateTime<Utc>> {
        match (self.manual_reset, latest_user_activity(entries)) {
            (Some(manual), Some(activity)) => Some(manual.max(activity)),
            (Some(manual), None) => Some(manual),
            (None, Some(activity)) => Some(activity),
            (None, None) => None,
        }
    }

    /// Time left before the idle timeout fires, never negative. None when
    /// no activity has been observed and no manual reset was made — the
    /// countdown has not started.
    pub fn remaining(&self, entries: &[Entry], now: DateTime<Utc>) -> Option<Duration> {
        let baseline = self.baseline(entries)?;
        let elapsed = (now - baseline).to_std().unwrap_or(Duration::ZERO);
        Some(self.timeout.saturating_sub(elapsed))
    }
}

/// Snapshot of everything derived for a monitoring surface.
#[derive(Debug, Clone)]
pub struct DerivedSnapshot {
    pub context_usage: Option<ContextUsage>,
    pub idle_time_left: Option<Duration>,
    pub running: bool,
}

impl DerivedSnapshot {
    pub fn compute(
        entries: &EntrySnapshot,
        processes: &ProcessSet,
        timer: &IdleTimer,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            context_usage: latest_context_usage(&entries.entries).cloned(),
            idle_time_left: timer.remaining(&entries.entries, now),
            running: processes.running,
        }
    }
}
