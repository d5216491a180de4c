//! Plan builder: expands wildcard descriptors into concrete tasks and
//! infers dependency edges from input/output file relationships.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use tracing::debug;
use walkdir::WalkDir;

use crate::error::EngineError;
use crate::graph::cycle;
use crate::models::{Task, TaskDescriptor, TaskStatus};

/// Build the concrete task list for a scenario. Descriptors are expanded
/// in textual order; wildcard inputs resolve against files already in
/// `workdir` plus concrete outputs of earlier descriptors. Fatal build
/// errors here prevent the plan file from ever being written.
pub fn build(descriptors: &[TaskDescriptor], workdir: &Path) -> Result<Vec<Task>, EngineError> {
    let disk = disk_files(workdir)?;
    debug!(files = disk.len(), "enumerated working directory");

    let mut tasks: Vec<Task> = Vec::new();
    let mut produced: BTreeMap<String, String> = BTreeMap::new();

    for descriptor in descriptors {
        for task in expand_descriptor(descriptor, &disk, &produced)? {
            for out in &task.outputs {
                if let Some(first) = produced.get(out) {
                    return Err(EngineError::output_collision(out, first, &task.id));
                }
            }
            for out in &task.outputs {
                produced.insert(out.clone(), task.id.clone());
            }
            tasks.push(task);
        }
    }

    // Whoever produces an input of T is a dependency of T. This runs
    // over the full expansion: concrete inputs may name outputs of a
    // descriptor that appears later in the scenario.
    for task in &mut tasks {
        let deps: BTreeSet<String> = task
            .inputs
            .iter()
            .filter_map(|input| produced.get(input).cloned())
            .collect();
        task.deps = deps;
    }

    cycle::detect_cycle(&tasks)?;

    for task in &mut tasks {
        task.status = if task.deps.is_empty() {
            TaskStatus::Waiting
        } else {
            TaskStatus::Pending
        };
    }

    debug!(tasks = tasks.len(), "plan expanded");
    Ok(tasks)
}

fn expand_descriptor(
    descriptor: &TaskDescriptor,
    disk: &BTreeSet<String>,
    produced: &BTreeMap<String, String>,
) -> Result<Vec<Task>, EngineError> {
    let wildcard_inputs: Vec<_> = descriptor
        .inputs
        .iter()
        .filter(|p| p.has_wildcards())
        .collect();

    if wildcard_inputs.is_empty() {
        if let Some(bad) = descriptor.outputs.iter().find(|p| p.has_wildcards()) {
            return Err(EngineError::binding_mismatch(
                &descriptor.id,
                format!(
                    "output pattern `{}` has wildcards but no input pattern does",
                    bad.as_str()
                ),
            ));
        }
        let inputs = descriptor
            .inputs
            .iter()
            .map(|p| p.as_str().to_string())
            .collect();
        let outputs = descriptor
            .outputs
            .iter()
            .map(|p| p.as_str().to_string())
            .collect();
        return Ok(vec![Task::new(
            descriptor.id.clone(),
            descriptor.class_name.clone(),
            inputs,
            outputs,
            descriptor.params.clone(),
        )]);
    }

    let arity = wildcard_inputs[0].wildcard_count();
    for pattern in &wildcard_inputs[1..] {
        if pattern.wildcard_count() != arity {
            return Err(EngineError::binding_mismatch(
                &descriptor.id,
                format!(
                    "input patterns `{}` and `{}` use different wildcard counts",
                    wildcard_inputs[0].as_str(),
                    pattern.as_str()
                ),
            ));
        }
    }

    let candidates: Vec<&str> = disk
        .iter()
        .map(String::as_str)
        .chain(produced.keys().map(String::as_str))
        .collect();

    let mut per_pattern: Vec<BTreeSet<Vec<String>>> = Vec::new();
    for pattern in &wildcard_inputs {
        let mut bindings = BTreeSet::new();
        for path in &candidates {
            if let Some(binding) = pattern.match_path(path) {
                bindings.insert(binding);
            }
        }
        if bindings.is_empty() {
            return Err(EngineError::unmatched_pattern(
                &descriptor.id,
                pattern.as_str(),
            ));
        }
        per_pattern.push(bindings);
    }

    // All wildcard inputs must agree on one binding set; the engine does
    // not expand cross-products.
    let bindings = &per_pattern[0];
    for (pattern, set) in wildcard_inputs.iter().zip(&per_pattern).skip(1) {
        if set != bindings {
            return Err(EngineError::binding_mismatch(
                &descriptor.id,
                format!(
                    "input pattern `{}` matches a different binding set than `{}`",
                    pattern.as_str(),
                    wildcard_inputs[0].as_str()
                ),
            ));
        }
    }

    let mut tasks = Vec::with_capacity(bindings.len());
    for binding in bindings {
        let id = format!("{}#{}", descriptor.id, binding.join("#"));
        let mut inputs = Vec::with_capacity(descriptor.inputs.len());
        for pattern in &descriptor.inputs {
            if pattern.has_wildcards() {
                inputs.push(pattern.substitute(binding)?);
            } else {
                inputs.push(pattern.as_str().to_string());
            }
        }
        let mut outputs = Vec::with_capacity(descriptor.outputs.len());
        for pattern in &descriptor.outputs {
            let out = pattern
                .substitute(binding)
                .map_err(|e| EngineError::binding_mismatch(&descriptor.id, &e.message))?;
            outputs.push(out);
        }
        tasks.push(Task::new(
            id,
            descriptor.class_name.clone(),
            inputs,
            outputs,
            descriptor.params.clone(),
        ));
    }
    Ok(tasks)
}

fn disk_files(workdir: &Path) -> Result<BTreeSet<String>, EngineError> {
    let mut files = BTreeSet::new();
    for entry in WalkDir::new(workdir).follow_links(false) {
        let entry = entry.map_err(|e| EngineError::io(e.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry.path().strip_prefix(workdir).unwrap_or(entry.path());
        let joined = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
        files.insert(joined);
    }
    Ok(files)
}
