use std::path::Path;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    ScenarioSyntax,
    DuplicateTaskId,
    UnmatchedPattern,
    BindingMismatch,
    OutputCollision,
    CyclicPlan,
    ScenarioChanged,
    StaleLease,
    PlanCorrupt,
    Io,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ScenarioSyntax => "SCENARIO_SYNTAX",
            Self::DuplicateTaskId => "DUPLICATE_TASK_ID",
            Self::UnmatchedPattern => "UNMATCHED_PATTERN",
            Self::BindingMismatch => "BINDING_MISMATCH",
            Self::OutputCollision => "OUTPUT_COLLISION",
            Self::CyclicPlan => "CYCLIC_PLAN",
            Self::ScenarioChanged => "SCENARIO_CHANGED",
            Self::StaleLease => "STALE_LEASE",
            Self::PlanCorrupt => "PLAN_CORRUPT",
            Self::Io => "IO",
        }
    }
}

#[derive(Debug, Error)]
#[error("{message}")]
pub struct EngineError {
    pub code: ErrorCode,
    pub message: String,
}

impl EngineError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn syntax(path: &Path, line: usize, message: impl AsRef<str>) -> Self {
        Self::new(
            ErrorCode::ScenarioSyntax,
            format!("{}:{}: {}", path.display(), line, message.as_ref()),
        )
    }

    pub fn duplicate_task_id(id: &str) -> Self {
        Self::new(
            ErrorCode::DuplicateTaskId,
            format!("duplicate task id `{id}`"),
        )
    }

    pub fn unmatched_pattern(task_id: &str, pattern: &str) -> Self {
        Self::new(
            ErrorCode::UnmatchedPattern,
            format!("task `{task_id}`: input pattern `{pattern}` matched nothing"),
        )
    }

    pub fn binding_mismatch(task_id: &str, detail: impl AsRef<str>) -> Self {
        Self::new(
            ErrorCode::BindingMismatch,
            format!("task `{}`: {}", task_id, detail.as_ref()),
        )
    }

    pub fn output_collision(path: &str, first: &str, second: &str) -> Self {
        Self::new(
            ErrorCode::OutputCollision,
            format!("output `{path}` produced by both `{first}` and `{second}`"),
        )
    }

    pub fn cyclic_plan(task_id: &str) -> Self {
        Self::new(
            ErrorCode::CyclicPlan,
            format!("dependency cycle involving task `{task_id}`"),
        )
    }

    pub fn scenario_changed(plan_path: &Path) -> Self {
        Self::new(
            ErrorCode::ScenarioChanged,
            format!(
                "scenario no longer matches existing plan `{}`; remove the plan to rebuild",
                plan_path.display()
            ),
        )
    }

    pub fn stale_lease(task_id: &str, owner: &str) -> Self {
        Self::new(
            ErrorCode::StaleLease,
            format!("task `{task_id}` is not leased by `{owner}`"),
        )
    }

    pub fn plan_corrupt(line: usize, message: impl AsRef<str>) -> Self {
        Self::new(
            ErrorCode::PlanCorrupt,
            format!("plan file line {}: {}", line, message.as_ref()),
        )
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Io, message)
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        Self::io(e.to_string())
    }
}
