pub mod builtin;

use std::collections::BTreeMap;
use std::path::PathBuf;

use thiserror::Error;

use crate::models::FailureKind;

/// Error raised by a leaf task. Kinds are restricted to the four
/// task-raisable values; the engine records them verbatim on the plan.
#[derive(Debug, Error)]
#[error("{}: {}", .kind.as_str(), .message)]
pub struct TaskError {
    pub kind: FailureKind,
    pub message: String,
}

impl TaskError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::new(FailureKind::IoError, message)
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(FailureKind::InvalidParams, message)
    }

    pub fn data(message: impl Into<String>) -> Self {
        Self::new(FailureKind::DataError, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Internal, message)
    }
}

impl From<std::io::Error> for TaskError {
    fn from(e: std::io::Error) -> Self {
        Self::io(e.to_string())
    }
}

/// Everything a leaf task is constructed from.
#[derive(Debug, Clone)]
pub struct TaskSpec {
    pub id: String,
    pub params: BTreeMap<String, String>,
    pub inputs: Vec<PathBuf>,
    pub outputs: Vec<PathBuf>,
}

/// The narrow capability the engine requires of a leaf task: construct
/// (via a registry factory, which may reject the parameters) and
/// perform. A task reads only its declared inputs and writes only its
/// declared outputs.
pub trait TaskClass: Send + std::fmt::Debug {
    fn perform(&self) -> Result<(), TaskError>;
}

pub type TaskFactory = fn(TaskSpec) -> Result<Box<dyn TaskClass>, TaskError>;

/// Closed-world mapping from scenario class names to constructors.
/// Replaces the runtime reflection of dynamically-loaded task classes:
/// every available leaf is registered once at startup.
pub struct Registry {
    factories: BTreeMap<String, TaskFactory>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// Registry seeded with the built-in file-transform leaves.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        builtin::register_all(&mut registry);
        registry
    }

    pub fn register(&mut self, class_name: &str, factory: TaskFactory) {
        self.factories.insert(class_name.to_string(), factory);
    }

    pub fn contains(&self, class_name: &str) -> bool {
        self.factories.contains_key(class_name)
    }

    pub fn construct(
        &self,
        class_name: &str,
        spec: TaskSpec,
    ) -> Result<Box<dyn TaskClass>, TaskError> {
        match self.factories.get(class_name) {
            Some(factory) => factory(spec),
            None => Err(TaskError::invalid_params(format!(
                "unknown task class `{class_name}`"
            ))),
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_class_is_invalid_params() {
        let registry = Registry::builtin();
        let spec = TaskSpec {
            id: "t".to_string(),
            params: BTreeMap::new(),
            inputs: vec![],
            outputs: vec![],
        };
        let err = registry.construct("NoSuchClass", spec).unwrap_err();
        assert_eq!(err.kind, FailureKind::InvalidParams);
        assert!(err.message.contains("NoSuchClass"));
    }

    #[test]
    fn builtin_classes_are_present() {
        let registry = Registry::builtin();
        for class in ["Cat", "Copy", "Touch", "Fail", "Sleep"] {
            assert!(registry.contains(class), "missing {class}");
        }
    }
}
