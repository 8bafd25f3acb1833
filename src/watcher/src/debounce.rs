//! A sliding-window debounce queue, pure and independent of `tokio` or
//! `notify` so its coalescing behavior is unit-testable without a runtime.

use crate::config::ChangeKind;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// An event pending emission once its deadline passes.
#[derive(Clone, Debug)]
struct Pending {
    change: ChangeKind,
    deadline: Instant,
}

/// Schedules watch events by path, coalescing repeated events for the same
/// path into a single emission at the latest deadline.
///
/// A later event for a path already pending replaces its deadline (sliding
/// window) and its change kind, so a rapid `created` followed by several
/// `modified` events for the same path emits once, as `modified`.
#[derive(Default)]
pub(crate) struct DebounceQueue {
    pending: HashMap<PathBuf, Pending>,
}

impl DebounceQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Schedule (or reschedule) `path` for emission `debounce` after `now`.
    pub(crate) fn schedule(
        &mut self,
        path: PathBuf,
        change: ChangeKind,
        debounce: Duration,
        now: Instant,
    ) {
        self.pending.insert(
            path,
            Pending {
                change,
                deadline: now + debounce,
            },
        );
    }

    /// Remove and return every path whose deadline is at or before `now`.
    pub(crate) fn drain_ready(&mut self, now: Instant) -> Vec<(PathBuf, ChangeKind)> {
        let ready: Vec<PathBuf> = self
            .pending
            .iter()
            .filter(|(_, pending)| pending.deadline <= now)
            .map(|(path, _)| path.clone())
            .collect();

        ready
            .into_iter()
            .filter_map(|path| {
                self.pending
                    .remove(&path)
                    .map(|pending| (path, pending.change))
            })
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_not_ready_before_deadline() {
        let mut queue = DebounceQueue::new();
        let t0 = Instant::now();
        queue.schedule(PathBuf::from("a.md"), ChangeKind::Created, Duration::from_secs(2), t0);

        assert!(queue.drain_ready(t0 + Duration::from_millis(500)).is_empty());
    }

    #[test]
    fn test_event_ready_after_deadline() {
        let mut queue = DebounceQueue::new();
        let t0 = Instant::now();
        queue.schedule(PathBuf::from("a.md"), ChangeKind::Created, Duration::from_secs(2), t0);

        let ready = queue.drain_ready(t0 + Duration::from_secs(2));
        assert_eq!(ready, vec![(PathBuf::from("a.md"), ChangeKind::Created)]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_repeated_events_for_same_path_slide_the_deadline() {
        let mut queue = DebounceQueue::new();
        let t0 = Instant::now();
        queue.schedule(PathBuf::from("a.md"), ChangeKind::Created, Duration::from_secs(2), t0);

        let t1 = t0 + Duration::from_secs(1);
        queue.schedule(PathBuf::from("a.md"), ChangeKind::Modified, Duration::from_secs(2), t1);

        assert!(queue.drain_ready(t0 + Duration::from_secs(2)).is_empty());

        let ready = queue.drain_ready(t1 + Duration::from_secs(2));
        assert_eq!(ready, vec![(PathBuf::from("a.md"), ChangeKind::Modified)]);
    }

    #[test]
    fn test_distinct_paths_are_independent() {
        let mut queue = DebounceQueue::new();
        let t0 = Instant::now();
        queue.schedule(PathBuf::from("a.md"), ChangeKind::Created, Duration::from_secs(1), t0);
        queue.schedule(PathBuf::from("b.md"), ChangeKind::Created, Duration::from_secs(5), t0);

        let ready = queue.drain_ready(t0 + Duration::from_secs(1));
        assert_eq!(ready, vec![(PathBuf::from("a.md"), ChangeKind::Created)]);
        assert!(!queue.is_empty());
    }
}
