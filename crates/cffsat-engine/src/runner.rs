//! One engine in one child process.
//!
//! The runner never lets a failure escape: whatever the worker does (answers,
//! crashes, gets killed, prints garbage) ends up as an [`Outcome`].

use std::ffi::OsString;
use std::io::{self, BufWriter, Read, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command, ExitStatus, Stdio};

use cffsat_formula::Formula;
use tracing::{debug, warn};

use crate::engine::Engine;
use crate::outcome::Outcome;
use crate::protocol::{self, WorkerRequestRef};

/// Bytes of worker stderr kept for diagnostics.
const STDERR_TAIL: usize = 4096;

/// How to start a worker process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommand {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    /// Address-space limit the worker applies to itself.
    pub memory_limit_bytes: Option<u64>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            memory_limit_bytes: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn with_memory_limit(mut self, bytes: Option<u64>) -> Self {
        self.memory_limit_bytes = bytes;
        self
    }

    /// The running executable, re-entered through its hidden worker subcommand.
    pub fn current_exe_subcommand(subcommand: &str) -> io::Result<Self> {
        Ok(Self::new(std::env::current_exe()?).arg(subcommand))
    }
}

/// A spawned worker. Dropping it does not kill the process; call [`EngineRunner::kill`].
#[derive(Debug)]
pub struct EngineRunner {
    engine: Engine,
    child: Child,
}

/// The worker's pipes, handed to whoever drives the exchange.
#[derive(Debug)]
pub struct RunnerPipes {
    stdin: ChildStdin,
    stdout: ChildStdout,
    stderr: ChildStderr,
}

/// Everything a worker wrote before closing stdout.
#[derive(Debug, Default)]
pub struct Collected {
    pub stdout: Vec<u8>,
    pub stderr_tail: String,
    pub write_error: Option<String>,
}

impl EngineRunner {
    pub fn spawn(command: &WorkerCommand, engine: Engine) -> io::Result<(Self, RunnerPipes)> {
        let mut process = Command::new(&command.program);
        process
            .args(&command.args)
            .env(crate::worker::PARENT_PID_ENV, std::process::id().to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        // Own process group: terminal signals go to the orchestrator only.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            process.process_group(0);
        }
        let mut child = process.spawn()?;

        let pipes = match (child.stdin.take(), child.stdout.take(), child.stderr.take()) {
            (Some(stdin), Some(stdout), Some(stderr)) => RunnerPipes {
                stdin,
                stdout,
                stderr,
            },
            _ => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(io::Error::other("worker pipes unavailable"));
            }
        };
        debug!(%engine, pid = child.id(), "worker spawned");
        Ok((Self { engine, child }, pipes))
    }

    /// Spawn, exchange, and wait, with no deadline.
    pub fn run(command: &WorkerCommand, engine: Engine, formula: &Formula) -> Outcome {
        let (mut runner, pipes) = match Self::spawn(command, engine) {
            Ok(spawned) => spawned,
            Err(e) => {
                return Outcome::EngineError(format!(
                    "failed to start {}: {e}",
                    command.program.display()
                ))
            }
        };
        let collected = pipes.exchange(engine, formula, command.memory_limit_bytes);
        let status = runner.wait();
        interpret(&collected, status, formula)
    }

    pub fn engine(&self) -> Engine {
        self.engine
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    pub fn wait(&mut self) -> io::Result<ExitStatus> {
        self.child.wait()
    }

    /// Kill and reap. Safe to call on a process that already exited.
    pub fn kill(&mut self) {
        if let Err(e) = self.child.kill() {
            debug!(engine = %self.engine, error = %e, "kill failed, worker already gone");
        }
        if let Err(e) = self.child.wait() {
            warn!(engine = %self.engine, error = %e, "failed to reap worker");
        }
    }
}

impl RunnerPipes {
    /// Send the request, then read stdout to EOF while draining stderr.
    ///
    /// Returns once the worker closes stdout: it answered, died, or was killed.
    pub fn exchange(
        self,
        engine: Engine,
        formula: &Formula,
        memory_limit_bytes: Option<u64>,
    ) -> Collected {
        let RunnerPipes {
            stdin,
            mut stdout,
            stderr,
        } = self;

        std::thread::scope(|scope| {
            let stderr_reader = scope.spawn(move || read_tail(stderr, STDERR_TAIL));

            let request = WorkerRequestRef {
                engine,
                formula,
                memory_limit_bytes,
            };
            let mut writer = BufWriter::new(stdin);
            let write_error = protocol::write_request(&mut writer, &request)
                .and_then(|()| writer.flush().map_err(Into::into))
                .err()
                .map(|e| e.to_string());
            // Closing stdin tells the worker the request is complete.
            drop(writer);

            let mut out = Vec::new();
            if let Err(e) = stdout.read_to_end(&mut out) {
                debug!(%engine, error = %e, "worker stdout read failed");
            }

            Collected {
                stdout: out,
                stderr_tail: stderr_reader.join().unwrap_or_default(),
                write_error,
            }
        })
    }
}

fn read_tail<R: Read>(mut reader: R, keep: usize) -> String {
    let mut tail: Vec<u8> = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        match reader.read(&mut buf) {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                tail.extend_from_slice(&buf[..n]);
                if tail.len() > 2 * keep {
                    tail.drain(..tail.len() - keep);
                }
            }
        }
    }
    if tail.len() > keep {
        tail.drain(..tail.len() - keep);
    }
    String::from_utf8_lossy(&tail).into_owned()
}

/// Classify what a finished worker left behind.
///
/// A parseable reply always wins. Without one, an allocation failure message
/// or an unexplained SIGKILL means memory ran out; anything else is an engine
/// error carrying the exit status and the end of stderr.
pub fn interpret(collected: &Collected, status: io::Result<ExitStatus>, formula: &Formula) -> Outcome {
    if let Ok(reply) = protocol::parse_reply(&collected.stdout) {
        return reply.verdict.into_outcome(formula);
    }

    let status = match status {
        Ok(status) => status,
        Err(e) => return Outcome::EngineError(format!("failed to reap worker: {e}")),
    };

    if mentions_allocation_failure(&collected.stderr_tail) {
        return Outcome::ResourceExhausted;
    }
    if killed_by_sigkill(&status) {
        // The race reaps the workers it kills itself, so this came from outside.
        return Outcome::ResourceExhausted;
    }

    let mut detail = format!("worker exited with {status} without a reply");
    if let Some(e) = &collected.write_error {
        detail.push_str(&format!("; request write failed: {e}"));
    }
    let tail = collected.stderr_tail.trim();
    if !tail.is_empty() {
        detail.push_str(&format!("; stderr: {tail}"));
    }
    Outcome::EngineError(detail)
}

fn mentions_allocation_failure(stderr: &str) -> bool {
    let lower = stderr.to_ascii_lowercase();
    lower.contains("memory allocation of")
        || lower.contains("out of memory")
        || lower.contains("cannot allocate memory")
}

#[cfg(unix)]
fn killed_by_sigkill(status: &ExitStatus) -> bool {
    use std::os::unix::process::ExitStatusExt;
    status.signal() == Some(nix::sys::signal::Signal::SIGKILL as i32)
}

#[cfg(not(unix))]
fn killed_by_sigkill(_status: &ExitStatus) -> bool {
    false
}
