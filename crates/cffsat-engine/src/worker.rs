//! The worker side of a race: one engine, one formula, one reply.
//!
//! A worker binds its lifetime to the parent before doing anything else, so a
//! crashed or killed orchestrator never leaves engines running.

use std::io::{self, BufReader};
use std::time::Instant;

use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use crate::protocol::{self, ProtocolError, WorkerReply};
use crate::solve;

/// Set by the runner to the spawning process's PID.
pub const PARENT_PID_ENV: &str = "CFFSAT_PARENT_PID";

/// Log to stderr only; stdout carries the reply.
pub fn init_worker_tracing() {
    let filter = EnvFilter::try_from_env("CFFSAT_WORKER_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

/// Serve one request from stdin to stdout.
pub fn serve_stdio() -> Result<(), ProtocolError> {
    bind_to_parent();
    let stdin = io::stdin();
    let stdout = io::stdout();
    serve(BufReader::new(stdin.lock()), stdout.lock())
}

/// Read a request, apply its limits, solve, and write the reply.
pub fn serve<R: io::Read, W: io::Write>(input: R, output: W) -> Result<(), ProtocolError> {
    let request = protocol::read_request(input)?;
    if let Some(bytes) = request.memory_limit_bytes {
        apply_memory_limit(bytes);
    }

    info!(
        engine = %request.engine,
        vars = request.formula.num_vars(),
        clauses = request.formula.len(),
        "solving"
    );
    let started = Instant::now();
    let verdict = solve::solve(request.engine, &request.formula);
    let solve_secs = started.elapsed().as_secs_f64();
    debug!(engine = %request.engine, solve_secs, "engine returned");

    // Release the formula before serializing the reply.
    let engine = request.engine;
    drop(request);

    protocol::write_reply(
        output,
        &WorkerReply {
            engine,
            verdict,
            solve_secs,
        },
    )
}

#[cfg(target_os = "linux")]
fn bind_to_parent() {
    use nix::sys::signal::Signal;

    if let Err(e) = nix::sys::prctl::set_pdeathsig(Signal::SIGKILL) {
        warn!(error = %e, "could not bind worker lifetime to parent");
    }
    // The parent may already be gone by the time the hook is installed.
    let actual = nix::unistd::getppid().as_raw();
    if parent_is_gone(expected_parent(), actual) {
        warn!(parent = actual, "parent exited before worker started");
        std::process::exit(3);
    }
}

#[cfg(target_os = "linux")]
fn expected_parent() -> Option<i32> {
    std::env::var(PARENT_PID_ENV).ok()?.trim().parse().ok()
}

/// True when the recorded spawner is no longer this process's parent.
///
/// Without a recorded spawner nothing can be concluded: PID 1 is a legitimate
/// parent when the orchestrator is itself a container's init.
#[cfg(any(target_os = "linux", test))]
fn parent_is_gone(expected: Option<i32>, actual: i32) -> bool {
    expected.is_some_and(|pid| pid != actual)
}

#[cfg(not(target_os = "linux"))]
fn bind_to_parent() {}

#[cfg(unix)]
fn apply_memory_limit(bytes: u64) {
    use nix::sys::resource::{setrlimit, Resource};

    let limit = bytes as nix::libc::rlim_t;
    match setrlimit(Resource::RLIMIT_AS, limit, limit) {
        Ok(()) => debug!(bytes, "address space limited"),
        Err(e) => warn!(bytes, error = %e, "could not apply memory limit"),
    }
}

#[cfg(not(unix))]
fn apply_memory_limit(bytes: u64) {
    warn!(bytes, "memory limits are not supported on this platform");
}
