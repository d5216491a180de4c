use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Waiting,
    InProgress,
    Done,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Waiting => "WAITING",
            Self::InProgress => "IN_PROGRESS",
            Self::Done => "DONE",
            Self::Failed => "FAILED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(Self::Pending),
            "WAITING" => Some(Self::Waiting),
            "IN_PROGRESS" => Some(Self::InProgress),
            "DONE" => Some(Self::Done),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

/// Failure kinds recorded on a task. The first four may be raised by a
/// leaf task; `Upstream` and `LeaseExhausted` are written by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    IoError,
    InvalidParams,
    DataError,
    Internal,
    Upstream,
    LeaseExhausted,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IoError => "IO_ERROR",
            Self::InvalidParams => "INVALID_PARAMS",
            Self::DataError => "DATA_ERROR",
            Self::Internal => "INTERNAL",
            Self::Upstream => "UPSTREAM",
            Self::LeaseExhausted => "LEASE_EXHAUSTED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "IO_ERROR" => Some(Self::IoError),
            "INVALID_PARAMS" => Some(Self::InvalidParams),
            "DATA_ERROR" => Some(Self::DataError),
            "INTERNAL" => Some(Self::Internal),
            "UPSTREAM" => Some(Self::Upstream),
            "LEASE_EXHAUSTED" => Some(Self::LeaseExhausted),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl TaskFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn upstream() -> Self {
        Self::new(FailureKind::Upstream, "upstream failure")
    }
}

/// One node of the plan: a concrete expansion of a descriptor.
///
/// `deps`, `params` and the path lists are kept in ordered collections so
/// the plan file encoding is canonical.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Task {
    pub id: String,
    pub class_name: String,
    pub status: TaskStatus,
    pub attempt: u32,
    pub owner: Option<String>,
    pub expiry: Option<DateTime<Utc>>,
    pub deps: BTreeSet<String>,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub params: BTreeMap<String, String>,
    pub error: Option<TaskFailure>,
}

impl Task {
    pub fn new(
        id: impl Into<String>,
        class_name: impl Into<String>,
        inputs: Vec<String>,
        outputs: Vec<String>,
        params: BTreeMap<String, String>,
    ) -> Self {
        Self {
            id: id.into(),
            class_name: class_name.into(),
            status: TaskStatus::Waiting,
            attempt: 0,
            owner: None,
            expiry: None,
            deps: BTreeSet::new(),
            inputs,
            outputs,
            params,
            error: None,
        }
    }
}
