//! The [`Registry`] holds every processor known to the pipeline, keyed by
//! its unique name, and can topologically order them by their declared
//! `requires` dependencies.
//!
//! Processors are registered in the order plugins are loaded. That order
//! is preserved and used to break ties when more than one processor is
//! runnable at the same point in the dependency graph -- two independent
//! registries built from the same plugin directory always produce the
//! same execution order.

#![deny(
    clippy::all,
    rust_2018_idioms,
    future_incompatible,
    missing_docs,
    nonstandard_style
)]
#![allow(clippy::multiple_crate_versions)]

use flowline_core::Processor;
use indexmap::IndexMap;
use std::collections::VecDeque;
use std::{error, fmt};

/// A collection of registered processors, orderable by dependency.
#[derive(Default)]
pub struct Registry {
    processors: IndexMap<String, Box<dyn Processor>>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("processors", &self.processors.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            processors: IndexMap::new(),
        }
    }

    /// Register a processor under its own [`Processor::name`].
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateName`] if a processor with the same
    /// name is already registered.
    pub fn register(&mut self, processor: Box<dyn Processor>) -> Result<(), RegistryError> {
        let name = processor.name().to_owned();
        if self.processors.contains_key(&name) {
            return Err(RegistryError::DuplicateName(name));
        }

        processor.on_load();
        self.processors.insert(name, processor);
        Ok(())
    }

    /// Remove a processor by name, calling its `on_unload` hook.
    pub fn unregister(&mut self, name: &str) -> Option<Box<dyn Processor>> {
        let removed = self.processors.shift_remove(name);
        if let Some(processor) = &removed {
            processor.on_unload();
        }
        removed
    }

    /// Look up a processor by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&dyn Processor> {
        self.processors.get(name).map(AsRef::as_ref)
    }

    /// Whether a processor with the given name is registered.
    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.processors.contains_key(name)
    }

    /// The number of registered processors.
    #[must_use]
    pub fn size(&self) -> usize {
        self.processors.len()
    }

    /// Iterate over every registered processor, in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &dyn Processor> {
        self.processors.values().map(AsRef::as_ref)
    }

    /// Every registered processor's name, in registration order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.processors.keys().cloned().collect()
    }

    /// Check that every processor's declared `requires` names a processor
    /// that is actually registered, across the whole registry.
    ///
    /// This is advisory: it never prevents registration, and is separate
    /// from [`Registry::get_execution_order`], which silently ignores a
    /// `requires` entry absent from the requested subset.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownDependency`] for the first
    /// unsatisfied dependency found.
    pub fn validate_dependencies(&self) -> Result<(), RegistryError> {
        for processor in self.processors.values() {
            for dependency in processor.requires() {
                if !self.processors.contains_key(dependency) {
                    return Err(RegistryError::UnknownDependency {
                        processor: processor.name().to_owned(),
                        dependency: dependency.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Compute a valid execution order for the given subset of registered
    /// processor names, using Kahn's algorithm. A `requires` entry pointing
    /// outside `names` is ignored for ordering purposes -- it is the
    /// caller's job (or [`Registry::validate_dependencies`]) to surface
    /// that as a configuration problem. Ties (multiple processors
    /// simultaneously runnable) are broken by registration order, not by
    /// the order of `names`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::CircularDependency`] if the subset's
    /// dependency graph has a cycle.
    pub fn get_execution_order(&self, names: &[String]) -> Result<Vec<String>, RegistryError> {
        use std::collections::HashSet;

        let subset: HashSet<&str> = names.iter().map(String::as_str).collect();

        // Registration order of the requested subset; this is both the
        // queue's initial seed order and the tie-break order.
        let ordered: Vec<&str> = self
            .processors
            .keys()
            .map(String::as_str)
            .filter(|name| subset.contains(name))
            .collect();

        let mut indegree: IndexMap<&str, usize> = ordered.iter().map(|&n| (n, 0)).collect();
        let mut dependents: IndexMap<&str, Vec<&str>> = ordered.iter().map(|&n| (n, Vec::new())).collect();

        for &name in &ordered {
            if let Some(processor) = self.processors.get(name) {
                for dependency in processor.requires() {
                    if subset.contains(dependency.as_str()) {
                        *indegree.get_mut(name).expect("name is in subset") += 1;
                        dependents
                            .get_mut(dependency.as_str())
                            .expect("dependency is in subset")
                            .push(name);
                    }
                }
            }
        }

        let mut queue: VecDeque<&str> = ordered
            .iter()
            .copied()
            .filter(|name| indegree[name] == 0)
            .collect();

        let mut order = Vec::with_capacity(ordered.len());
        while let Some(name) = queue.pop_front() {
            order.push(name.to_owned());

            if let Some(dependents) = dependents.get(name) {
                for &dependent in dependents {
                    let remaining = indegree.get_mut(dependent).expect("name is in subset");
                    *remaining -= 1;
                    if *remaining == 0 {
                        queue.push_back(dependent);
                    }
                }
            }
        }

        if order.len() != ordered.len() {
            let resolved: HashSet<&str> = order.iter().map(String::as_str).collect();
            let remaining: Vec<String> = ordered
                .iter()
                .filter(|name| !resolved.contains(*name))
                .map(|name| (*name).to_owned())
                .collect();
            return Err(RegistryError::CircularDependency(remaining));
        }

        Ok(order)
    }
}

/// Errors a [`Registry`] operation can fail with.
#[derive(Debug)]
pub enum RegistryError {
    /// A processor with this name is already registered.
    DuplicateName(String),
    /// A processor declared a `requires` dependency that is not registered.
    UnknownDependency {
        /// The processor with the unsatisfied dependency.
        processor: String,
        /// The missing dependency's name.
        dependency: String,
    },
    /// The dependency graph contains a cycle, so no execution order exists.
    /// Carries the names still unresolved when the cycle was detected --
    /// every node on or feeding into the cycle, not just its members.
    CircularDependency(Vec<String>),

    #[doc(hidden)]
    __Unknown,
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateName(name) => write!(f, "processor `{}` is already registered", name),
            Self::UnknownDependency {
                processor,
                dependency,
            } => write!(
                f,
                "processor `{}` requires unregistered processor `{}`",
                processor, dependency
            ),
            Self::CircularDependency(remaining) => write!(
                f,
                "processor dependency graph contains a cycle among: {}",
                remaining.join(", ")
            ),
            Self::__Unknown => unreachable!(),
        }
    }
}

impl error::Error for RegistryError {}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use flowline_core::{Context, Job, ProcessorError, StepResult};

    #[derive(Debug)]
    struct Stub {
        name: &'static str,
        requires: Vec<String>,
    }

    impl Stub {
        fn new(name: &'static str, requires: &[&str]) -> Box<dyn Processor> {
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
            unimplemented!("not exercised in registry tests")
        }

        async fn revert(&self, _job: &Job, _result: &StepResult, _ctx: &mut Context) -> bool {
            true
        }
    }

    #[test]
    fn test_register_rejects_duplicate_names() {
        let mut registry = Registry::new();
        registry.register(Stub::new("a", &[])).unwrap();

        let err = registry.register(Stub::new("a", &[])).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateName(name) if name == "a"));
    }

    #[test]
    fn test_unregister_removes_and_calls_on_unload() {
        let mut registry = Registry::new();
        registry.register(Stub::new("a", &[])).unwrap();

        assert!(registry.has("a"));
        registry.unregister("a");
        assert!(!registry.has("a"));
    }

    #[test]
    fn test_validate_dependencies_catches_unknown() {
        let mut registry = Registry::new();
        registry.register(Stub::new("a", &["b"])).unwrap();

        let err = registry.validate_dependencies().unwrap_err();
        assert!(matches!(err, RegistryError::UnknownDependency { .. }));
    }

    #[test]
    fn test_execution_order_respects_dependencies() {
        let mut registry = Registry::new();
        registry.register(Stub::new("c", &["b"])).unwrap();
        registry.register(Stub::new("b", &["a"])).unwrap();
        registry.register(Stub::new("a", &[])).unwrap();

        let order = registry.get_execution_order(&registry.names()).unwrap();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_execution_order_breaks_ties_by_registration_order() {
        let mut registry = Registry::new();
        registry.register(Stub::new("z", &[])).unwrap();
        registry.register(Stub::new("y", &[])).unwrap();
        registry.register(Stub::new("x", &[])).unwrap();

        let order = registry.get_execution_order(&registry.names()).unwrap();
        assert_eq!(order, vec!["z", "y", "x"]);
    }

    #[test]
    fn test_execution_order_detects_cycle() {
        let mut registry = Registry::new();
        registry.register(Stub::new("a", &["b"])).unwrap();
        registry.register(Stub::new("b", &["a"])).unwrap();

        let err = registry.get_execution_order(&registry.names()).unwrap_err();
        match err {
            RegistryError::CircularDependency(mut remaining) => {
                remaining.sort();
                assert_eq!(remaining, vec!["a".to_owned(), "b".to_owned()]);
            }
            other => panic!("expected CircularDependency, got {:?}", other),
        }
    }

    #[test]
    fn test_execution_order_cycle_lists_only_unresolved_nodes() {
        let mut registry = Registry::new();
        registry.register(Stub::new("a", &[])).unwrap();
        registry.register(Stub::new("b", &["c"])).unwrap();
        registry.register(Stub::new("c", &["b"])).unwrap();

        let err = registry.get_execution_order(&registry.names()).unwrap_err();
        match err {
            RegistryError::CircularDependency(mut remaining) => {
                remaining.sort();
                assert_eq!(remaining, vec!["b".to_owned(), "c".to_owned()]);
            }
            other => panic!("expected CircularDependency, got {:?}", other),
        }
    }

    #[test]
    fn test_execution_order_ignores_dependency_outside_subset() {
        let mut registry = Registry::new();
        registry.register(Stub::new("a", &[])).unwrap();
        registry.register(Stub::new("b", &["a"])).unwrap();

        // "a" is not in the requested subset, so its absence must not be
        // treated as a missing dependency here -- only validate_dependencies
        // surfaces that, and only when asked about the whole registry.
        let order = registry.get_execution_order(&["b".to_owned()]).unwrap();
        assert_eq!(order, vec!["b"]);
    }

    #[test]
    fn test_size_and_iter() {
        let mut registry = Registry::new();
        registry.register(Stub::new("a", &[])).unwrap();
        registry.register(Stub::new("b", &[])).unwrap();

        assert_eq!(registry.size(), 2);
        assert_eq!(registry.iter().count(), 2);
    }
}
