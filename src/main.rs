use std::process;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use taskrun::cli::commands::Cli;
use taskrun::cli::run;

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

extern "C" fn on_shutdown_signal(_: nix::libc::c_int) {
    SHUTDOWN.store(true, Ordering::SeqCst);
}

fn install_signal_handlers() -> anyhow::Result<()> {
    use nix::sys::signal::{signal, SigHandler, Signal};
    let handler = SigHandler::Handler(on_shutdown_signal);
    // SAFETY: the handler only stores to an atomic.
    unsafe {
        signal(Signal::SIGINT, handler).context("install SIGINT handler")?;
        signal(Signal::SIGTERM, handler).context("install SIGTERM handler")?;
    }
    Ok(())
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "error",
        1 => "warn",
        2 => "info",
        3 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    let cli_args = Cli::parse();
    init_tracing(cli_args.verbosity);

    if let Err(e) = install_signal_handlers() {
        eprintln!("Error: {e:#}");
        process::exit(2);
    }

    let exit_code = run::run(&cli_args, &SHUTDOWN);
    process::exit(exit_code);
}
