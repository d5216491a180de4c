use std::collections::BTreeSet;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;

use crate::error::{EngineError, ErrorCode};
use crate::models::{Task, TaskStatus};

pub const PLAN_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize)]
pub struct PlanHeader {
    pub version: u32,
    pub scenario_sha256: String,
    pub created: String,
}

/// The frozen DAG derived from a scenario. Created once; tasks are only
/// ever mutated in place, never added or removed.
#[derive(Debug, Clone, Serialize)]
pub struct Plan {
    pub header: PlanHeader,
    pub tasks: Vec<Task>,
}

impl Plan {
    pub fn new(scenario_sha256: String, tasks: Vec<Task>) -> Self {
        Self {
            header: PlanHeader {
                version: PLAN_FORMAT_VERSION,
                scenario_sha256,
                created: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            },
            tasks,
        }
    }

    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn task_mut(&mut self, id: &str) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id == id)
    }

    pub fn progress(&self) -> PlanProgress {
        let mut p = PlanProgress::default();
        for task in &self.tasks {
            match task.status {
                TaskStatus::Pending => p.pending += 1,
                TaskStatus::Waiting => p.waiting += 1,
                TaskStatus::InProgress => p.in_progress += 1,
                TaskStatus::Done => p.done += 1,
                TaskStatus::Failed => p.failed += 1,
            }
        }
        p.total = self.tasks.len();
        p.percentage = if p.total > 0 {
            (p.done as f64 / p.total as f64) * 100.0
        } else {
            100.0
        };
        p
    }

    /// Structural invariants, checked before every persisted write.
    pub fn validate(&self) -> Result<(), EngineError> {
        let mut ids = BTreeSet::new();
        let mut outputs = BTreeSet::new();
        for task in &self.tasks {
            if !ids.insert(task.id.as_str()) {
                return Err(invariant(format!("duplicate task id `{}`", task.id)));
            }
            for out in &task.outputs {
                if !outputs.insert(out.as_str()) {
                    return Err(invariant(format!("output `{out}` listed twice")));
                }
            }
        }
        for task in &self.tasks {
            for dep in &task.deps {
                if !ids.contains(dep.as_str()) {
                    return Err(invariant(format!(
                        "task `{}` depends on unknown `{dep}`",
                        task.id
                    )));
                }
            }
            let leased = task.status == TaskStatus::InProgress;
            let owned = task.owner.as_deref().is_some_and(|o| !o.is_empty());
            if leased && (!owned || task.expiry.is_none()) {
                return Err(invariant(format!(
                    "in-progress task `{}` lacks owner or expiry",
                    task.id
                )));
            }
            if !leased && (task.owner.is_some() || task.expiry.is_some()) {
                return Err(invariant(format!(
                    "task `{}` holds lease fields while {}",
                    task.id,
                    task.status.as_str()
                )));
            }
            if task.status == TaskStatus::Failed && task.error.is_none() {
                return Err(invariant(format!(
                    "failed task `{}` has no recorded error",
                    task.id
                )));
            }
        }
        Ok(())
    }
}

fn invariant(message: String) -> EngineError {
    EngineError::new(ErrorCode::PlanCorrupt, message)
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct PlanProgress {
    pub total: usize,
    pub pending: usize,
    pub waiting: usize,
    pub in_progress: usize,
    pub done: usize,
    pub failed: usize,
    pub percentage: f64,
}

impl PlanProgress {
    /// True when no task can make further progress.
    pub fn is_quiescent(&self) -> bool {
        self.pending == 0 && self.waiting == 0 && self.in_progress == 0
    }

    pub fn all_done(&self) -> bool {
        self.done == self.total
    }
}
