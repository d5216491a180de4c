use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;

use chrono::Duration;
use tracing::{error, info};

use crate::cli::commands::Cli;
use crate::error::EngineError;
use crate::expand;
use crate::models::Plan;
use crate::output;
use crate::scenario;
use crate::store::{PlanStore, StoreConfig};
use crate::tasks::Registry;
use crate::worker::{self, PoolConfig};

const EXIT_OK: i32 = 0;
const EXIT_FAILED: i32 = 1;
const EXIT_FATAL: i32 = 2;

/// Process driver: each glob match of each positional argument is an
/// independent run; the process exits with the worst per-run code.
pub fn run(cli: &Cli, shutdown: &AtomicBool) -> i32 {
    if let Some(dir) = &cli.workdir {
        if let Err(e) = env::set_current_dir(dir) {
            error!(workdir = %dir.display(), "cannot enter working directory: {e}");
            return EXIT_FATAL;
        }
    }

    let scenarios = match expand_scenario_args(&cli.scenario) {
        Ok(paths) => paths,
        Err(e) => {
            report_error(cli, &e);
            return EXIT_FATAL;
        }
    };

    let registry = Registry::builtin();
    let mut exit = EXIT_OK;
    for path in &scenarios {
        exit = exit.max(run_scenario(cli, &registry, path, shutdown));
    }
    exit
}

fn expand_scenario_args(args: &[String]) -> Result<Vec<PathBuf>, EngineError> {
    let mut paths = Vec::new();
    for arg in args {
        let matches =
            glob::glob(arg).map_err(|e| EngineError::io(format!("bad scenario pattern `{arg}`: {e}")))?;
        for entry in matches {
            let path = entry.map_err(|e| EngineError::io(e.to_string()))?;
            paths.push(path);
        }
    }
    if paths.is_empty() {
        return Err(EngineError::io(format!(
            "no scenario matches {}",
            args.join(", ")
        )));
    }
    Ok(paths)
}

fn run_scenario(cli: &Cli, registry: &Registry, path: &Path, shutdown: &AtomicBool) -> i32 {
    match run_scenario_inner(cli, registry, path, shutdown) {
        Ok(code) => code,
        Err(e) => {
            report_error(cli, &e);
            EXIT_FATAL
        }
    }
}

fn run_scenario_inner(
    cli: &Cli,
    registry: &Registry,
    path: &Path,
    shutdown: &AtomicBool,
) -> Result<i32, EngineError> {
    info!(scenario = %path.display(), "parsing scenario");
    let text = fs::read_to_string(path)?;
    let descriptors = scenario::parse_str(&text, path)?;
    let tasks = expand::build(&descriptors, Path::new("."))?;
    let plan = Plan::new(scenario::sha256_hex(&text), tasks);

    if cli.parse_only {
        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&output::json::plan_summary(&plan)).unwrap()
            );
        } else {
            output::text::print_plan(&plan);
        }
        return Ok(EXIT_OK);
    }

    let store = PlanStore::new(
        path,
        StoreConfig {
            lease_ttl: Duration::seconds(cli.lease_ttl),
            max_attempts: cli.max_attempts,
        },
    );
    store.initialize_if_absent(plan)?;

    let pool = PoolConfig {
        workers: cli.threads.max(1),
        batch_size: cli.retrieve_count.max(1),
    };
    let progress = worker::run_pool(&store, registry, &pool, shutdown)?;

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&output::json::run_report(&progress)).unwrap()
        );
    } else {
        output::text::print_progress(&progress);
    }

    if progress.failed > 0 {
        Ok(EXIT_FAILED)
    } else if progress.all_done() {
        Ok(EXIT_OK)
    } else {
        // Interrupted before quiescence; leases recover on restart.
        Ok(EXIT_FAILED)
    }
}

fn report_error(cli: &Cli, e: &EngineError) {
    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&output::json::error(e)).unwrap()
        );
    } else {
        eprintln!("Error: {}", e.message);
    }
}
