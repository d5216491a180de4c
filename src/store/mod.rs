pub mod codec;
pub mod lock;

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use crate::error::EngineError;
use crate::graph::ready;
use crate::models::{FailureKind, Plan, PlanProgress, Task, TaskFailure, TaskStatus};
use crate::store::lock::PlanLock;

pub const DEFAULT_LEASE_TTL_SECS: i64 = 3600;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub lease_ttl: Duration,
    pub max_attempts: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            lease_ttl: Duration::seconds(DEFAULT_LEASE_TTL_SECS),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

#[derive(Debug, Clone)]
pub enum TaskOutcome {
    Success,
    Failure(TaskFailure),
}

/// The single point of coordination: a plan file next to the scenario,
/// every read and mutation under an exclusive advisory lock, every
/// write a whole-file rewrite via temp file + atomic rename.
pub struct PlanStore {
    plan_path: PathBuf,
    lock_path: PathBuf,
    config: StoreConfig,
}

impl PlanStore {
    pub fn new(scenario_path: &Path, config: StoreConfig) -> Self {
        let plan_path = sibling(scenario_path, ".plan");
        let lock_path = sibling(&plan_path, ".lock");
        Self {
            plan_path,
            lock_path,
            config,
        }
    }

    pub fn plan_path(&self) -> &Path {
        &self.plan_path
    }

    /// Write the plan if no plan file exists yet. If one exists, verify
    /// it was built from the same scenario text and leave it untouched;
    /// a digest mismatch is fatal until the operator removes the plan.
    pub fn initialize_if_absent(&self, plan: Plan) -> Result<(), EngineError> {
        let _lock = PlanLock::acquire(&self.lock_path)?;
        if self.plan_path.exists() {
            let existing = self.read_plan()?;
            if existing.header.scenario_sha256 != plan.header.scenario_sha256 {
                return Err(EngineError::scenario_changed(&self.plan_path));
            }
            debug!(plan = %self.plan_path.display(), "plan file already present, resuming");
            return Ok(());
        }
        info!(plan = %self.plan_path.display(), tasks = plan.tasks.len(), "writing initial plan");
        self.write_plan(&plan)
    }

    /// Lease up to `n` ready tasks for `owner`. Settles the plan first:
    /// promotions to `WAITING` and upstream-failure propagation happen
    /// here, under the same lock as the lease itself.
    pub fn lease(&self, owner: &str, n: usize) -> Result<Vec<Task>, EngineError> {
        let _lock = PlanLock::acquire(&self.lock_path)?;
        let mut plan = self.read_plan()?;
        let settled = ready::settle(&mut plan);
        let expiry = Utc::now() + self.config.lease_ttl;

        let ids = ready::select_waiting(&plan, n);
        for id in &ids {
            if let Some(task) = plan.task_mut(id) {
                task.status = TaskStatus::InProgress;
                task.owner = Some(owner.to_string());
                task.expiry = Some(expiry);
            }
        }
        let leased: Vec<Task> = ids
            .iter()
            .filter_map(|id| plan.task(id).cloned())
            .collect();

        if settled > 0 || !leased.is_empty() {
            self.write_plan(&plan)?;
        }
        if !leased.is_empty() {
            debug!(owner, leased = leased.len(), settled, "leased tasks");
        }
        Ok(leased)
    }

    /// Record the outcome of a leased task. The record must still be
    /// `IN_PROGRESS` and owned by `owner`; otherwise the lease went
    /// stale (expired and reassigned) and the report is discarded.
    pub fn report(
        &self,
        owner: &str,
        task_id: &str,
        outcome: &TaskOutcome,
    ) -> Result<(), EngineError> {
        let _lock = PlanLock::acquire(&self.lock_path)?;
        let mut plan = self.read_plan()?;
        let task = plan
            .task_mut(task_id)
            .ok_or_else(|| EngineError::stale_lease(task_id, owner))?;
        if task.status != TaskStatus::InProgress || task.owner.as_deref() != Some(owner) {
            return Err(EngineError::stale_lease(task_id, owner));
        }
        task.owner = None;
        task.expiry = None;
        match outcome {
            TaskOutcome::Success => {
                task.status = TaskStatus::Done;
                task.error = None;
            }
            TaskOutcome::Failure(failure) => {
                task.status = TaskStatus::Failed;
                task.error = Some(failure.clone());
            }
        }
        self.write_plan(&plan)
    }

    pub fn snapshot(&self) -> Result<PlanProgress, EngineError> {
        let _lock = PlanLock::acquire(&self.lock_path)?;
        Ok(self.read_plan()?.progress())
    }

    /// Requeue `IN_PROGRESS` records whose lease expired before `now`.
    /// Each reclaim bumps `attempt`; past `max_attempts` the task is
    /// finished as `FAILED(LEASE_EXHAUSTED)` instead of requeued.
    pub fn reclaim_expired(&self, now: DateTime<Utc>) -> Result<usize, EngineError> {
        let _lock = PlanLock::acquire(&self.lock_path)?;
        let mut plan = self.read_plan()?;
        let mut reclaimed = 0;
        for task in &mut plan.tasks {
            if task.status != TaskStatus::InProgress {
                continue;
            }
            if task.expiry.is_some_and(|e| e >= now) {
                continue;
            }
            let stale_owner = task.owner.take();
            task.expiry = None;
            task.attempt += 1;
            if task.attempt > self.config.max_attempts {
                task.status = TaskStatus::Failed;
                task.error = Some(TaskFailure::new(
                    FailureKind::LeaseExhausted,
                    format!("lease abandoned {} times", task.attempt),
                ));
                warn!(task = %task.id, attempts = task.attempt, "lease attempts exhausted");
            } else {
                task.status = TaskStatus::Waiting;
                task.error = None;
                warn!(
                    task = %task.id,
                    stale_owner = stale_owner.as_deref().unwrap_or("-"),
                    attempt = task.attempt,
                    "reclaimed expired lease"
                );
            }
            reclaimed += 1;
        }
        if reclaimed > 0 {
            self.write_plan(&plan)?;
        }
        Ok(reclaimed)
    }

    fn read_plan(&self) -> Result<Plan, EngineError> {
        let text = fs::read_to_string(&self.plan_path)?;
        codec::decode(&text)
    }

    fn write_plan(&self, plan: &Plan) -> Result<(), EngineError> {
        plan.validate()?;
        let text = codec::encode(plan);
        let tmp = sibling(&self.plan_path, &format!(".tmp.{}", process::id()));
        {
            let mut file = File::create(&tmp)?;
            file.write_all(text.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.plan_path)?;
        Ok(())
    }
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(suffix);
    PathBuf::from(os)
}
