use std::path::PathBuf;

use clap::Parser;

const VERSION: &str = env!("GIT_VERSION");

#[derive(Parser)]
#[command(
    name = "taskrun",
    version = VERSION,
    about = "Run a scenario's tasks in dependency order across worker threads",
    after_help = "\
SCENARIO FORMAT:
  <id> : <class_name>
    in: <pattern> [, <pattern>]*
    out: <pattern> [, <pattern>]*
    params:
      <key> = <value>
  Blocks separated by blank lines; `#` starts a comment. Patterns may use
  `*` (one path segment) and `**` (any prefix).

EXIT CODES:
  0  Plan reached an all-DONE state (or was empty)
  1  At least one task FAILED, or the run was interrupted before quiescence
  2  Scenario parse/build error, or the scenario changed under an existing plan

COORDINATION:
  The plan lives at <scenario>.plan next to the scenario. Cooperating
  instances on a shared filesystem may run the same scenario concurrently;
  all plan mutations are serialized by an advisory lock. Remove the plan
  file to rebuild after editing the scenario."
)]
pub struct Cli {
    /// Scenario file path(s); glob patterns run each match independently
    #[arg(required = true)]
    pub scenario: Vec<String>,

    /// Number of worker threads
    #[arg(short = 't', long, default_value_t = 1)]
    pub threads: usize,

    /// Log verbosity, 0-4 (error..trace); RUST_LOG overrides
    #[arg(short = 'v', long, default_value_t = 0)]
    pub verbosity: u8,

    /// Tasks leased per batch
    #[arg(short = 'c', long = "retrieve_count", default_value_t = 10)]
    pub retrieve_count: usize,

    /// Parse and expand only: print the plan without writing anything
    #[arg(short = 'p', long = "parse_only")]
    pub parse_only: bool,

    /// Working directory for all scenario paths
    #[arg(short = 'd', long)]
    pub workdir: Option<PathBuf>,

    /// Lease time-to-live in seconds before a task may be reclaimed
    #[arg(long = "lease_ttl", default_value_t = crate::store::DEFAULT_LEASE_TTL_SECS)]
    pub lease_ttl: i64,

    /// Abandoned-lease retries before a task fails with LEASE_EXHAUSTED
    #[arg(long = "max_attempts", default_value_t = crate::store::DEFAULT_MAX_ATTEMPTS)]
    pub max_attempts: u32,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}
