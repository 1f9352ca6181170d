use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::ProcessError;
use crate::types::StreamCursor;

pub mod copy;
pub mod grep;
pub mod sort;
pub use copy::CopyFileProcess;
pub use grep::GrepProcess;
pub use sort::SortFileProcess;

/// Result of one unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Continue,
    Finished,
}

/// The work a migratable process performs.
///
/// `step` must leave every owned stream at a consistent offset when it
/// returns: the gap between two calls is the safe point at which the
/// process may be suspended, serialised or stopped.
#[async_trait]
pub trait Workload: Send {
    fn kind(&self) -> &'static str;

    /// Throttle between units of work when the node does not override it.
    fn pace(&self) -> Duration;

    async fn step(&mut self) -> Result<Step, ProcessError>;

    /// Adjusts state right before serialisation.
    fn migration_pre_process(&mut self);

    fn close(&mut self);

    fn cursors(&self) -> Vec<StreamCursor>;

    /// Loads cursors captured on another node, matched by name.
    fn restore(&mut self, cursors: &[StreamCursor]);
}

/// Builds a workload from its launch arguments (identifier excluded).
pub type WorkloadCtor = fn(&[String]) -> Result<Box<dyn Workload>, ProcessError>;

/// Maps kind names to workload constructors.
#[derive(Clone)]
pub struct WorkloadRegistry {
    ctors: HashMap<String, WorkloadCtor>,
}

impl WorkloadRegistry {
    pub fn new() -> Self {
        Self {
            ctors: HashMap::new(),
        }
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(CopyFileProcess::KIND, CopyFileProcess::construct);
        registry.register(GrepProcess::KIND, GrepProcess::construct);
        registry.register(SortFileProcess::KIND, SortFileProcess::construct);
        registry
    }

    /// Registers `ctor` under `kind`, replacing any earlier registration.
    pub fn register(&mut self, kind: impl Into<String>, ctor: WorkloadCtor) {
        self.ctors.insert(kind.into(), ctor);
    }

    pub fn construct(&self, kind: &str, args: &[String]) -> Result<Box<dyn Workload>, ProcessError> {
        let ctor = self
            .ctors
            .get(kind)
            .ok_or_else(|| ProcessError::UnknownKind(kind.to_string()))?;
        ctor(args)
    }

    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.ctors.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }
}

/// Finds the cursor named `name`, if one was captured.
pub(crate) fn cursor_named<'a>(cursors: &'a [StreamCursor], name: &str) -> Option<&'a StreamCursor> {
    cursors.iter().find(|c| c.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn defaults_cover_reference_workloads() {
        let registry = WorkloadRegistry::with_defaults();
        assert_eq!(
            registry.kinds(),
            vec!["CopyFileProcess", "GrepProcess", "SortFileProcess"]
        );
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let registry = WorkloadRegistry::with_defaults();
        assert!(matches!(
            registry.construct("copyfileprocess", &args(&["a", "b"])),
            Err(ProcessError::UnknownKind(kind)) if kind == "copyfileprocess"
        ));
    }

    #[test]
    fn wrong_arity_is_rejected_by_the_constructor() {
        let registry = WorkloadRegistry::with_defaults();
        assert!(matches!(
            registry.construct("GrepProcess", &args(&["a", "b"])),
            Err(ProcessError::InvalidArguments(_))
        ));
        assert!(registry.construct("GrepProcess", &args(&["x", "a", "b"])).is_ok());
    }

    #[test]
    fn registration_extends_the_set_of_kinds() {
        let mut registry = WorkloadRegistry::new();
        registry.register("Copy", CopyFileProcess::construct);
        let workload = registry.construct("Copy", &args(&["a", "b"])).unwrap();
        assert_eq!(workload.kind(), CopyFileProcess::KIND);
    }
}
