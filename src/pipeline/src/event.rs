//! The lifecycle event taxonomy and its fan-out to external subscribers.

use flowline_core::Id;
use serde::Serialize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

/// A lifecycle event the pipeline emits as jobs and steps progress, and
/// the file watcher detects changes. Mirrors the wire format an external
/// HTTP/WS surface would forward verbatim: a flat JSON object tagged by
/// its `event` field.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    /// A job was created, via a command or a watcher-detected file.
    JobCreated {
        /// The created job's id.
        job_id: Id,
    },
    /// A job's per-job driver task picked it up and began running steps.
    JobStarted {
        /// The started job's id.
        job_id: Id,
    },
    /// A job ran every applicable step to completion.
    JobCompleted {
        /// The completed job's id.
        job_id: Id,
    },
    /// A job's step failed and the job could not continue.
    JobFailed {
        /// The failed job's id.
        job_id: Id,
        /// The error message recorded on the job.
        error: String,
    },
    /// A step finished (successfully, by failure, or by being skipped).
    StepCompleted {
        /// The job the step belongs to.
        job_id: Id,
        /// The processor name that ran.
        step_name: String,
        /// The step's resulting status, as its `Display` form (e.g.
        /// `completed`, `failed`, `skipped`).
        status: String,
    },
    /// A step suspended the job for human input.
    StepAwaitingInput {
        /// The job the step belongs to.
        job_id: Id,
        /// The processor name awaiting input.
        step_name: String,
    },
    /// The file watcher produced a debounced, pattern-matched change.
    FileDetected {
        /// The path that changed.
        path: String,
        /// The watch that matched it.
        watch_name: String,
        /// The kind of change, as its `Display` form (e.g. `created`).
        event_type: String,
    },
}

type Subscriber = Arc<dyn Fn(&Event) + Send + Sync>;

/// A registry of event subscribers, fanning out every published [`Event`]
/// to each of them. A subscriber that panics is caught and logged; it
/// never prevents delivery to the others.
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<Subscriber>>>,
}

impl EventBus {
    /// An event bus with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber. Returns no handle -- subscriptions live for
    /// the lifetime of the bus (and, transitively, the pipeline).
    pub fn subscribe(&self, f: impl Fn(&Event) + Send + Sync + 'static) {
        self.subscribers.lock().unwrap().push(Arc::new(f));
    }

    /// Deliver `event` to every subscriber.
    pub fn publish(&self, event: Event) {
        let subscribers = self.subscribers.lock().unwrap().clone();
        for subscriber in subscribers {
            let outcome = catch_unwind(AssertUnwindSafe(|| subscriber(&event)));
            if outcome.is_err() {
                tracing::error!("event subscriber panicked; event still delivered to others");
            }
        }
    }
}
