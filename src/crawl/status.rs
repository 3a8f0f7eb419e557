//! Live crawl status shared between the running crawl and status pollers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Mutex, MutexGuard};

/// What started a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunKind {
    /// Operator asked for a full run
    Manual,
    /// Daily scheduler fired
    Scheduled,
    /// Single-item refresh after a link edit
    Item,
}

impl RunKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunKind::Manual => "manual",
            RunKind::Scheduled => "scheduled",
            RunKind::Item => "item",
        }
    }
}

impl fmt::Display for RunKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time copy of the crawl state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CrawlStatus {
    pub is_running: bool,
    pub run_id: Option<String>,
    pub kind: Option<RunKind>,
    pub progress: usize,
    pub total: usize,
    pub current_item_label: Option<String>,
    pub started_by: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub success_count: usize,
    pub failed_count: usize,
    /// Most recent failures, oldest first
    pub errors: VecDeque<String>,
}

/// The single shared status record.
///
/// The running flag and every counter live under one lock, so starting a run
/// is one atomic check-and-set.
pub(crate) struct StatusBoard {
    state: Mutex<CrawlStatus>,
    error_buffer: usize,
}

impl StatusBoard {
    pub(crate) fn new(error_buffer: usize) -> Self {
        Self {
            state: Mutex::new(CrawlStatus::default()),
            error_buffer: error_buffer.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CrawlStatus> {
        // Recover from poisoning
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Claim the board for a new run; false when a run is already going
    pub(crate) fn try_begin(&self, kind: RunKind, started_by: &str, run_id: &str) -> bool {
        let mut state = self.lock();
        if state.is_running {
            return false;
        }
        *state = CrawlStatus {
            is_running: true,
            run_id: Some(run_id.to_string()),
            kind: Some(kind),
            started_by: Some(started_by.to_string()),
            started_at: Some(Utc::now()),
            ..Default::default()
        };
        true
    }

    pub(crate) fn set_total(&self, total: usize) {
        self.lock().total = total;
    }

    pub(crate) fn set_current(&self, label: String) {
        self.lock().current_item_label = Some(label);
    }

    pub(crate) fn record_success(&self) {
        let mut state = self.lock();
        state.success_count += 1;
        state.progress += 1;
    }

    pub(crate) fn record_failure(&self, message: String) {
        let mut state = self.lock();
        state.failed_count += 1;
        state.progress += 1;
        state.errors.push_back(message);
        while state.errors.len() > self.error_buffer {
            state.errors.pop_front();
        }
    }

    /// Back to idle; counters stay readable until the next run
    pub(crate) fn finish(&self) {
        let mut state = self.lock();
        state.is_running = false;
        state.current_item_label = None;
    }

    pub(crate) fn is_running(&self) -> bool {
        self.lock().is_running
    }

    pub(crate) fn snapshot(&self) -> CrawlStatus {
        self.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_begin_is_refused() {
        let board = StatusBoard::new(5);
        assert!(board.try_begin(RunKind::Manual, "alice", "run-1"));
        assert!(!board.try_begin(RunKind::Scheduled, "scheduler", "run-2"));

        let status = board.snapshot();
        assert_eq!(status.run_id.as_deref(), Some("run-1"));
        assert_eq!(status.kind, Some(RunKind::Manual));

        board.finish();
        assert!(board.try_begin(RunKind::Scheduled, "scheduler", "run-2"));
    }

    #[test]
    fn test_error_buffer_drops_oldest() {
        let board = StatusBoard::new(2);
        board.try_begin(RunKind::Manual, "alice", "run-1");
        board.set_total(3);
        board.record_failure("first".to_string());
        board.record_failure("second".to_string());
        board.record_failure("third".to_string());

        let status = board.snapshot();
        assert_eq!(status.failed_count, 3);
        assert_eq!(status.progress, 3);
        assert_eq!(status.errors, VecDeque::from(vec!["second".to_string(), "third".to_string()]));
    }

    #[test]
    fn test_begin_resets_counters_and_finish_keeps_them() {
        let board = StatusBoard::new(5);
        board.try_begin(RunKind::Manual, "alice", "run-1");
        board.set_current("A123 / slot 1".to_string());
        board.record_success();
        board.finish();

        let done = board.snapshot();
        assert!(!done.is_running);
        assert_eq!(done.current_item_label, None);
        assert_eq!(done.success_count, 1);

        board.try_begin(RunKind::Item, "bob", "run-2");
        let fresh = board.snapshot();
        assert_eq!(fresh.success_count, 0);
        assert_eq!(fresh.started_by.as_deref(), Some("bob"));
    }
}
