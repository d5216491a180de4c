//! Built-in file-transform leaf tasks. These are the leaves exercised by
//! the engine's own scenarios; a surrounding task library would register
//! further classes the same way.

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use std::thread;
use std::time::Duration;

use crate::models::FailureKind;
use crate::tasks::{Registry, TaskClass, TaskError, TaskSpec};

pub fn register_all(registry: &mut Registry) {
    registry.register("Cat", cat);
    registry.register("Copy", copy);
    registry.register("Touch", touch);
    registry.register("Fail", fail);
    registry.register("Sleep", sleep);
}

fn ensure_parent(path: &Path) -> Result<(), TaskError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

/// Concatenate all inputs, in order, into the single output.
#[derive(Debug)]
struct CatTask {
    spec: TaskSpec,
}

fn cat(spec: TaskSpec) -> Result<Box<dyn TaskClass>, TaskError> {
    if spec.outputs.len() != 1 {
        return Err(TaskError::invalid_params(format!(
            "Cat expects exactly one output, got {}",
            spec.outputs.len()
        )));
    }
    Ok(Box::new(CatTask { spec }))
}

impl TaskClass for CatTask {
    fn perform(&self) -> Result<(), TaskError> {
        let output = &self.spec.outputs[0];
        ensure_parent(output)?;
        let mut sink = File::create(output)?;
        for input in &self.spec.inputs {
            let bytes = fs::read(input)?;
            sink.write_all(&bytes)?;
        }
        Ok(())
    }
}

/// Copy input i to output i.
#[derive(Debug)]
struct CopyTask {
    spec: TaskSpec,
}

fn copy(spec: TaskSpec) -> Result<Box<dyn TaskClass>, TaskError> {
    if spec.inputs.len() != spec.outputs.len() {
        return Err(TaskError::invalid_params(format!(
            "Copy expects matching input/output counts, got {}/{}",
            spec.inputs.len(),
            spec.outputs.len()
        )));
    }
    Ok(Box::new(CopyTask { spec }))
}

impl TaskClass for CopyTask {
    fn perform(&self) -> Result<(), TaskError> {
        for (input, output) in self.spec.inputs.iter().zip(&self.spec.outputs) {
            ensure_parent(output)?;
            fs::copy(input, output)?;
        }
        Ok(())
    }
}

/// Create every output, empty.
#[derive(Debug)]
struct TouchTask {
    spec: TaskSpec,
}

fn touch(spec: TaskSpec) -> Result<Box<dyn TaskClass>, TaskError> {
    Ok(Box::new(TouchTask { spec }))
}

impl TaskClass for TouchTask {
    fn perform(&self) -> Result<(), TaskError> {
        for output in &self.spec.outputs {
            ensure_parent(output)?;
            File::create(output)?;
        }
        Ok(())
    }
}

/// Always fails with the kind/message given in params.
#[derive(Debug)]
struct FailTask {
    kind: FailureKind,
    message: String,
}

fn fail(spec: TaskSpec) -> Result<Box<dyn TaskClass>, TaskError> {
    let kind = match spec.params.get("kind").map(String::as_str) {
        None => FailureKind::IoError,
        Some(token) => match FailureKind::from_str(token) {
            Some(kind @ (FailureKind::IoError
            | FailureKind::InvalidParams
            | FailureKind::DataError
            | FailureKind::Internal)) => kind,
            _ => {
                return Err(TaskError::invalid_params(format!(
                    "kind must be a task-raisable failure kind, got `{token}`"
                )))
            }
        },
    };
    let message = spec
        .params
        .get("message")
        .cloned()
        .unwrap_or_else(|| "task failed".to_string());
    Ok(Box::new(FailTask { kind, message }))
}

impl TaskClass for FailTask {
    fn perform(&self) -> Result<(), TaskError> {
        Err(TaskError::new(self.kind, self.message.clone()))
    }
}

/// Sleep `millis` (default 250), then create every output empty. Used to
/// hold leases open in concurrency tests.
#[derive(Debug)]
struct SleepTask {
    spec: TaskSpec,
    millis: u64,
}

fn sleep(spec: TaskSpec) -> Result<Box<dyn TaskClass>, TaskError> {
    let millis = match spec.params.get("millis") {
        None => 250,
        Some(raw) => raw.parse::<u64>().map_err(|_| {
            TaskError::invalid_params(format!("millis must be an integer, got `{raw}`"))
        })?,
    };
    Ok(Box::new(SleepTask { spec, millis }))
}

impl TaskClass for SleepTask {
    fn perform(&self) -> Result<(), TaskError> {
        thread::sleep(Duration::from_millis(self.millis));
        for output in &self.spec.outputs {
            ensure_parent(output)?;
            File::create(output)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn spec(dir: &Path, inputs: &[&str], outputs: &[&str]) -> TaskSpec {
        TaskSpec {
            id: "t".to_string(),
            params: BTreeMap::new(),
            inputs: inputs.iter().map(|p| dir.join(p)).collect(),
            outputs: outputs.iter().map(|p| dir.join(p)).collect(),
        }
    }

    #[test]
    fn cat_concatenates_in_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("a"), "hel").expect("write");
        fs::write(dir.path().join("b"), "lo").expect("write");
        let registry = Registry::builtin();
        let task = registry
            .construct("Cat", spec(dir.path(), &["a", "b"], &["out"]))
            .expect("construct");
        task.perform().expect("perform");
        assert_eq!(fs::read_to_string(dir.path().join("out")).expect("read"), "hello");
    }

    #[test]
    fn copy_requires_matching_arity() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = Registry::builtin();
        let err = registry
            .construct("Copy", spec(dir.path(), &["a", "b"], &["out"]))
            .unwrap_err();
        assert_eq!(err.kind, FailureKind::InvalidParams);
    }

    #[test]
    fn copy_creates_missing_output_dirs() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("a"), "data").expect("write");
        let registry = Registry::builtin();
        registry
            .construct("Copy", spec(dir.path(), &["a"], &["nested/deep/a"]))
            .expect("construct")
            .perform()
            .expect("perform");
        assert_eq!(
            fs::read_to_string(dir.path().join("nested/deep/a")).expect("read"),
            "data"
        );
    }

    #[test]
    fn fail_uses_params() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut s = spec(dir.path(), &[], &[]);
        s.params.insert("kind".to_string(), "DATA_ERROR".to_string());
        s.params.insert("message".to_string(), "boom".to_string());
        let registry = Registry::builtin();
        let err = registry.construct("Fail", s).expect("construct").perform().unwrap_err();
        assert_eq!(err.kind, FailureKind::DataError);
        assert_eq!(err.message, "boom");
    }

    #[test]
    fn fail_rejects_engine_only_kinds() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = Registry::builtin();
        for token in ["no_such", "UPSTREAM", "LEASE_EXHAUSTED"] {
            let mut s = spec(dir.path(), &[], &[]);
            s.params.insert("kind".to_string(), token.to_string());
            let err = registry.construct("Fail", s).unwrap_err();
            assert_eq!(err.kind, FailureKind::InvalidParams, "{token}");
        }
    }
}
