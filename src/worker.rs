//! Worker pool: W OS threads sharing one plan store handle. Workers
//! coordinate only through the store; the sole shared in-process state
//! is the shutdown flag.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::error::{EngineError, ErrorCode};
use crate::models::{FailureKind, PlanProgress, Task, TaskFailure};
use crate::store::{PlanStore, TaskOutcome};
use crate::tasks::{Registry, TaskSpec};

pub const BACKOFF_START: Duration = Duration::from_millis(250);
pub const BACKOFF_CAP: Duration = Duration::from_secs(8);

const SHUTDOWN_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub workers: usize,
    pub batch_size: usize,
}

struct Backoff {
    current: Duration,
}

impl Backoff {
    fn new() -> Self {
        Self {
            current: BACKOFF_START,
        }
    }

    fn reset(&mut self) {
        self.current = BACKOFF_START;
    }

    fn next(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(BACKOFF_CAP);
        delay
    }
}

/// Owner tag unique across all cooperating workers on all hosts.
pub fn owner_tag(index: usize) -> String {
    let host = hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "localhost".to_string());
    format!("{host}:{}:{index}", process::id())
}

/// Run the pool to quiescence (or shutdown) and return the final counts.
pub fn run_pool(
    store: &PlanStore,
    registry: &Registry,
    config: &PoolConfig,
    shutdown: &AtomicBool,
) -> Result<PlanProgress, EngineError> {
    thread::scope(|scope| {
        let mut handles = Vec::with_capacity(config.workers);
        for index in 0..config.workers {
            let owner = owner_tag(index);
            let batch_size = config.batch_size;
            handles.push(scope.spawn(move || {
                worker_loop(store, registry, &owner, batch_size, shutdown)
            }));
        }
        for handle in handles {
            match handle.join() {
                Ok(result) => result?,
                Err(_) => {
                    return Err(EngineError::new(ErrorCode::Io, "worker thread panicked"))
                }
            }
        }
        Ok(())
    })?;
    store.snapshot()
}

fn worker_loop(
    store: &PlanStore,
    registry: &Registry,
    owner: &str,
    batch_size: usize,
    shutdown: &AtomicBool,
) -> Result<(), EngineError> {
    let mut backoff = Backoff::new();
    loop {
        if shutdown.load(Ordering::SeqCst) {
            info!(worker = owner, "shutdown requested, refusing new leases");
            return Ok(());
        }

        // Every iteration also recovers leases abandoned by crashed
        // peers; a lone restarted instance must not deadlock on them.
        store.reclaim_expired(Utc::now())?;

        let batch = store.lease(owner, batch_size)?;
        if batch.is_empty() {
            let progress = store.snapshot()?;
            if progress.is_quiescent() {
                debug!(worker = owner, "no work left, worker exiting");
                return Ok(());
            }
            sleep_interruptible(backoff.next(), shutdown);
            continue;
        }

        backoff.reset();
        for task in &batch {
            if shutdown.load(Ordering::SeqCst) {
                // Remaining leases stay IN_PROGRESS; peers or a restart
                // reclaim them after the TTL.
                return Ok(());
            }
            info!(worker = owner, task = %task.id, class = %task.class_name, "executing");
            let outcome = execute(registry, task);
            if let TaskOutcome::Failure(failure) = &outcome {
                warn!(
                    worker = owner,
                    task = %task.id,
                    kind = failure.kind.as_str(),
                    message = %failure.message,
                    "task failed"
                );
                discard_outputs(task);
            }
            match store.report(owner, &task.id, &outcome) {
                Ok(()) => {}
                Err(e) if e.code == ErrorCode::StaleLease => {
                    // Lease expired and was reassigned; the peer's run
                    // is authoritative, drop ours.
                    debug!(worker = owner, task = %task.id, "stale lease, report discarded");
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn execute(registry: &Registry, task: &Task) -> TaskOutcome {
    let spec = TaskSpec {
        id: task.id.clone(),
        params: task.params.clone(),
        inputs: task.inputs.iter().map(PathBuf::from).collect(),
        outputs: task.outputs.iter().map(PathBuf::from).collect(),
    };
    let class = match registry.construct(&task.class_name, spec) {
        Ok(class) => class,
        Err(e) => return TaskOutcome::Failure(TaskFailure::new(e.kind, e.message)),
    };
    match catch_unwind(AssertUnwindSafe(|| class.perform())) {
        Ok(Ok(())) => match missing_output(task) {
            None => TaskOutcome::Success,
            Some(path) => TaskOutcome::Failure(TaskFailure::new(
                FailureKind::IoError,
                format!("declared output `{path}` missing after perform"),
            )),
        },
        Ok(Err(e)) => TaskOutcome::Failure(TaskFailure::new(e.kind, e.message)),
        Err(panic) => TaskOutcome::Failure(TaskFailure::new(
            FailureKind::Internal,
            panic_message(panic),
        )),
    }
}

fn missing_output(task: &Task) -> Option<&str> {
    task.outputs
        .iter()
        .find(|out| !PathBuf::from(out).exists())
        .map(String::as_str)
}

/// Anything a failed task left on disk is garbage.
fn discard_outputs(task: &Task) {
    for out in &task.outputs {
        let path = PathBuf::from(out);
        if path.exists() {
            if let Err(e) = std::fs::remove_file(&path) {
                debug!(output = %out, error = %e, "could not discard output");
            }
        }
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "task panicked".to_string()
    }
}

fn sleep_interruptible(total: Duration, shutdown: &AtomicBool) {
    let mut remaining = total;
    while remaining > Duration::ZERO {
        if shutdown.load(Ordering::SeqCst) {
            return;
        }
        let slice = remaining.min(SHUTDOWN_POLL);
        thread::sleep(slice);
        remaining -= slice;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expand;
    use crate::scenario;
    use crate::store::StoreConfig;
    use crate::tasks::{TaskClass, TaskError};
    use std::fs;
    use std::path::Path;

    fn run_scenario_text(dir: &Path, text: &str, workers: usize) -> PlanProgress {
        let descriptors = scenario::parse_str(text, Path::new("test.scen")).expect("parse");
        let tasks = expand::build(&descriptors, dir).expect("build");
        let plan = crate::models::Plan::new(scenario::sha256_hex(text), tasks);
        let store = PlanStore::new(&dir.join("test.scen"), StoreConfig::default());
        store.initialize_if_absent(plan).expect("init");

        let registry = Registry::builtin();
        let config = PoolConfig {
            workers,
            batch_size: 10,
        };
        let shutdown = AtomicBool::new(false);
        run_pool(&store, &registry, &config, &shutdown).expect("pool")
    }

    #[test]
    fn backoff_doubles_to_cap_and_resets() {
        let mut backoff = Backoff::new();
        assert_eq!(backoff.next(), Duration::from_millis(250));
        assert_eq!(backoff.next(), Duration::from_millis(500));
        for _ in 0..8 {
            backoff.next();
        }
        assert_eq!(backoff.next(), BACKOFF_CAP);
        backoff.reset();
        assert_eq!(backoff.next(), BACKOFF_START);
    }

    #[test]
    fn owner_tags_differ_per_worker() {
        assert_ne!(owner_tag(0), owner_tag(1));
        assert!(owner_tag(0).contains(&process::id().to_string()));
    }

    #[derive(Debug)]
    struct Noop;

    impl TaskClass for Noop {
        fn perform(&self) -> Result<(), TaskError> {
            Ok(())
        }
    }

    fn noop(_spec: TaskSpec) -> Result<Box<dyn TaskClass>, TaskError> {
        Ok(Box::new(Noop))
    }

    #[derive(Debug)]
    struct Explode;

    impl TaskClass for Explode {
        fn perform(&self) -> Result<(), TaskError> {
            panic!("kaboom");
        }
    }

    fn explode(_spec: TaskSpec) -> Result<Box<dyn TaskClass>, TaskError> {
        Ok(Box::new(Explode))
    }

    #[test]
    fn execute_reports_missing_declared_output() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut registry = Registry::builtin();
        registry.register("Noop", noop);
        let record = Task::new(
            "t",
            "Noop",
            vec![],
            vec![dir.path().join("never").to_string_lossy().into_owned()],
            Default::default(),
        );
        match execute(&registry, &record) {
            TaskOutcome::Failure(f) => {
                assert_eq!(f.kind, FailureKind::IoError);
                assert!(f.message.contains("missing"));
            }
            TaskOutcome::Success => panic!("expected failure"),
        }
    }

    #[test]
    fn execute_converts_panic_to_internal_failure() {
        let mut registry = Registry::builtin();
        registry.register("Explode", explode);
        let record = Task::new("t", "Explode", vec![], vec![], Default::default());
        match execute(&registry, &record) {
            TaskOutcome::Failure(f) => {
                assert_eq!(f.kind, FailureKind::Internal);
                assert_eq!(f.message, "kaboom");
            }
            TaskOutcome::Success => panic!("expected failure"),
        }
    }

    #[test]
    fn pool_completes_independent_tasks_with_two_workers() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(dir.path().join("data")).expect("mkdir");
        fs::write(dir.path().join("data/p.txt"), "p").expect("write");
        fs::write(dir.path().join("data/q.txt"), "q").expect("write");

        // Inputs/outputs as absolute paths so the pool needs no CWD.
        let text = format!(
            "p : Copy\n  in: {d}/data/p.txt\n  out: {d}/out/p.txt\n\nq : Copy\n  in: {d}/data/q.txt\n  out: {d}/out/q.txt\n",
            d = dir.path().display()
        );
        let progress = run_scenario_text(dir.path(), &text, 2);
        assert!(progress.is_quiescent());
        assert_eq!(progress.done, 2);
        assert_eq!(
            fs::read_to_string(dir.path().join("out/p.txt")).expect("read"),
            "p"
        );
        assert_eq!(
            fs::read_to_string(dir.path().join("out/q.txt")).expect("read"),
            "q"
        );
    }

    #[test]
    fn pool_isolates_failure_to_dependents() {
        let dir = tempfile::tempdir().expect("tempdir");
        let text = format!(
            "bad : Fail\n  out: {d}/a.txt\n\ndownstream : Copy\n  in: {d}/a.txt\n  out: {d}/b.txt\n\nunrelated : Touch\n  out: {d}/c.txt\n",
            d = dir.path().display()
        );
        let progress = run_scenario_text(dir.path(), &text, 1);
        assert_eq!(progress.done, 1);
        assert_eq!(progress.failed, 2);
        assert!(!dir.path().join("b.txt").exists());
        assert!(dir.path().join("c.txt").exists());

        let plan_text =
            fs::read_to_string(dir.path().join("test.scen.plan")).expect("plan");
        assert!(plan_text.contains("upstream failure"));
    }

    #[test]
    fn shutdown_flag_stops_leasing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let text = format!("only : Touch\n  out: {d}/x.txt\n", d = dir.path().display());
        let descriptors = scenario::parse_str(&text, Path::new("test.scen")).expect("parse");
        let tasks = expand::build(&descriptors, dir.path()).expect("build");
        let plan = crate::models::Plan::new(scenario::sha256_hex(&text), tasks);
        let store = PlanStore::new(&dir.path().join("test.scen"), StoreConfig::default());
        store.initialize_if_absent(plan).expect("init");

        let registry = Registry::builtin();
        let config = PoolConfig {
            workers: 1,
            batch_size: 10,
        };
        let shutdown = AtomicBool::new(true);
        run_pool(&store, &registry, &config, &shutdown).expect("pool");

        let progress = store.snapshot().expect("snapshot");
        assert_eq!(progress.done, 0);
        assert_eq!(progress.waiting, 1);
        assert!(!dir.path().join("x.txt").exists());
    }

    #[test]
    fn panic_message_extracts_str_payloads() {
        let boxed: Box<dyn Any + Send> = Box::new("exploded");
        assert_eq!(panic_message(boxed), "exploded");
        let boxed: Box<dyn Any + Send> = Box::new("owned".to_string());
        assert_eq!(panic_message(boxed), "owned");
        let boxed: Box<dyn Any + Send> = Box::new(17_u32);
        assert_eq!(panic_message(boxed), "task panicked");
    }
}
