//! The [`Router`] is a stateless decision procedure: given a job and a
//! registry, it picks the next runnable step (if any). It never raises --
//! a broken `should_process` call or a cyclic dependency graph is logged
//! and treated as "no next step", never surfaced as an error to the
//! caller.

#![deny(
    clippy::all,
    rust_2018_idioms,
    future_incompatible,
    missing_docs,
    nonstandard_style
)]
#![allow(clippy::multiple_crate_versions)]

use flowline_core::{Job, StepStatus};
use flowline_registry::Registry;
use std::collections::HashSet;

/// Picks the next runnable step for a job, given a processor [`Registry`].
#[derive(Debug)]
pub struct Router<'a> {
    registry: &'a Registry,
}

impl<'a> Router<'a> {
    /// Build a router over the given registry.
    #[must_use]
    pub fn new(registry: &'a Registry) -> Self {
        Self { registry }
    }

    /// Select the next step to run for `job`, or `None` if every
    /// applicable step has already completed (or none apply).
    pub async fn get_next_step(&self, job: &Job) -> Option<String> {
        let applicable = self.applicable_steps(job).await;

        let ordered = match self.registry.get_execution_order(&applicable) {
            Ok(order) => order,
            Err(err) => {
                tracing::error!(
                    error = %err,
                    "processor dependency graph is not a DAG; router returning no next step"
                );
                return None;
            }
        };

        let completed = job.completed_steps();
        ordered.into_iter().find(|name| {
            !completed.contains(name.as_str()) && self.dependencies_satisfied(name, &completed)
        })
    }

    /// Whether `name` could run right now for `job`: `false` with a reason
    /// if the processor is unregistered, the step already completed, or a
    /// dependency has not.
    #[must_use]
    pub fn can_run_step(&self, job: &Job, name: &str) -> (bool, Option<String>) {
        let processor = match self.registry.get(name) {
            Some(processor) => processor,
            None => return (false, Some(format!("processor `{}` is not registered", name))),
        };

        let completed = job.completed_steps();
        if completed.contains(name) {
            return (false, Some(format!("step `{}` has already completed", name)));
        }

        let missing: Vec<&str> = processor
            .requires()
            .iter()
            .map(String::as_str)
            .filter(|dep| !completed.contains(dep))
            .collect();

        if !missing.is_empty() {
            return (
                false,
                Some(format!(
                    "step `{}` is missing dependencies: {}",
                    name,
                    missing.join(", ")
                )),
            );
        }

        (true, None)
    }

    /// Every applicable step not yet completed, in dependency order.
    pub async fn get_pending_steps(&self, job: &Job) -> Vec<String> {
        let applicable = self.applicable_steps(job).await;
        let ordered = self.registry.get_execution_order(&applicable).unwrap_or_else(|err| {
            tracing::error!(error = %err, "processor dependency graph is not a DAG");
            Vec::new()
        });

        let completed = job.completed_steps();
        ordered
            .into_iter()
            .filter(|name| !completed.contains(name.as_str()))
            .collect()
    }

    /// Step names with a `completed` entry in history, most recent first.
    ///
    /// This is a superficial, artifact-agnostic filter -- it does not know
    /// whether the underlying artifacts are actually reversible, since the
    /// router has no access to the artifact store. Callers must still
    /// confirm reversibility (e.g. via `StepResult::can_revert`) before
    /// acting on this list.
    #[must_use]
    pub fn get_revertable_steps(&self, job: &Job) -> Vec<String> {
        job.history
            .iter()
            .rev()
            .filter(|result| result.status == StepStatus::Completed)
            .map(|result| result.step_name.clone())
            .collect()
    }

    fn dependencies_satisfied(&self, name: &str, completed: &HashSet<&str>) -> bool {
        self.registry.get(name).is_some_and(|processor| {
            processor
                .requires()
                .iter()
                .all(|dep| completed.contains(dep.as_str()))
        })
    }

    async fn applicable_steps(&self, job: &Job) -> Vec<String> {
        let mut names = Vec::new();
        for processor in self.registry.iter() {
            if processor.should_process(job).await {
                names.push(processor.name().to_owned());
            }
        }
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use flowline_core::{Context, Processor, ProcessorError, SourceType, StepResult};

    #[derive(Debug)]
    struct Stub {
        name: &'static str,
        requires: Vec<String>,
    }

    impl Stub {
        fn boxed(name: &'static str, requires: &[&str]) -> Box<dyn Processor> {
            Box::new(Self {
                name,
                requires: requires.iter().map(|s| (*s).to_owned()).collect(),
            })
        }
    }

    #[async_trait]
    impl Processor for Stub {
        fn name(&self) -> &str {
            self.name
        }

        fn requires(&self) -> &[String] {
            &self.requires
        }

        async fn should_process(&self, _job: &Job) -> bool {
            true
        }

        async fn process(&self, _job: &Job, _ctx: &mut Context) -> Result<StepResult, ProcessorError> {
            unimplemented!("not exercised in router tests")
        }

        async fn revert(&self, _job: &Job, _result: &StepResult, _ctx: &mut Context) -> bool {
            true
        }
    }

    fn registry() -> Registry {
        let mut registry = Registry::new();
        registry.register(Stub::boxed("a", &[])).unwrap();
        registry.register(Stub::boxed("b", &["a"])).unwrap();
        registry
    }

    #[tokio::test]
    async fn test_get_next_step_returns_first_unblocked_step() {
        let registry = registry();
        let router = Router::new(&registry);
        let job = Job::new("test", SourceType::Manual, Utc::now());

        assert_eq!(router.get_next_step(&job).await, Some("a".to_owned()));
    }

    #[tokio::test]
    async fn test_get_next_step_never_returns_completed_step_again() {
        let registry = registry();
        let router = Router::new(&registry);
        let mut job = Job::new("test", SourceType::Manual, Utc::now());

        let mut a = StepResult::new("a", Utc::now());
        a.mark_completed(flowline_core::DataBag::new(), Utc::now());
        job.push_history(a);

        assert_eq!(router.get_next_step(&job).await, Some("b".to_owned()));

        let mut b = StepResult::new("b", Utc::now());
        b.mark_completed(flowline_core::DataBag::new(), Utc::now());
        job.push_history(b);

        assert_eq!(router.get_next_step(&job).await, None);
    }

    #[tokio::test]
    async fn test_can_run_step_reports_missing_dependency() {
        let registry = registry();
        let router = Router::new(&registry);
        let job = Job::new("test", SourceType::Manual, Utc::now());

        let (ok, reason) = router.can_run_step(&job, "b");
        assert!(!ok);
        assert!(reason.unwrap().contains('a'));
    }

    #[tokio::test]
    async fn test_can_run_step_unknown_processor() {
        let registry = registry();
        let router = Router::new(&registry);
        let job = Job::new("test", SourceType::Manual, Utc::now());

        let (ok, reason) = router.can_run_step(&job, "missing");
        assert!(!ok);
        assert!(reason.is_some());
    }

    #[tokio::test]
    async fn test_get_revertable_steps_most_recent_first() {
        let registry = registry();
        let router = Router::new(&registry);
        let mut job = Job::new("test", SourceType::Manual, Utc::now());

        let mut a = StepResult::new("a", Utc::now());
        a.mark_completed(flowline_core::DataBag::new(), Utc::now());
        job.push_history(a);

        let mut b = StepResult::new("b", Utc::now());
        b.mark_completed(flowline_core::DataBag::new(), Utc::now());
        job.push_history(b);

        assert_eq!(router.get_revertable_steps(&job), vec!["b", "a"]);
    }
}
