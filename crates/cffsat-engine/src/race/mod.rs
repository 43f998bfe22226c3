//! First-definitive-wins racing of several engines on one formula.
//!
//! A race launches one worker per engine and publishes exactly one result:
//!
//! - the first satisfiable or unsatisfiable answer from the current generation,
//! - `TimedOut` when the deadline passes first,
//! - `ResourceExhausted` when memory stays critical after degrading,
//! - `Unknown` when every runner finished without a definitive answer, or the
//!   race was cancelled.
//!
//! Publishing kills and reaps every remaining worker. Degrading to a single
//! engine bumps the generation so late answers from replaced runners are
//! ignored.

mod state;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use cffsat_formula::Formula;
use crossbeam::channel::{self, Receiver};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::engine::Engine;
use crate::outcome::Outcome;
use crate::runner::{EngineRunner, RunnerPipes, WorkerCommand};
use crate::supervisor::{MemoryProbe, ResourceSupervisor, SupervisorConfig, SystemMemory};

pub use state::{RaceStatus, RunnerReport};
use state::{RaceState, RunnerSlot};

#[derive(Debug, thiserror::Error)]
pub enum RaceError {
    #[error("no engines configured")]
    NoEngines,

    #[error("failed to start worker for {engine}: {source}")]
    Spawn {
        engine: Engine,
        #[source]
        source: std::io::Error,
    },
}

/// Settings for one race.
#[derive(Debug, Clone)]
pub struct RaceConfig {
    /// Engines to launch, in order. The first is always launched.
    pub engines: Vec<Engine>,
    pub timeout: Duration,
    pub worker: WorkerCommand,
    pub supervisor: SupervisorConfig,
}

/// Cooperative cancellation shared with whoever drives the race.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_shared(flag: Arc<AtomicBool>) -> Self {
        Self(flag)
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Everything known about a finished race.
#[derive(Debug, Clone)]
pub struct RaceReport {
    pub outcome: Outcome,
    pub winner: Option<Engine>,
    pub elapsed: Duration,
    pub degraded: bool,
    pub degradations: u32,
    pub engines_launched: Vec<Engine>,
    pub worker_pids: Vec<u32>,
    pub runner_reports: Vec<RunnerReport>,
    pub peak_memory_percent: f64,
    pub cancelled: bool,
}

pub struct Race {
    config: RaceConfig,
}

impl Race {
    pub fn new(config: RaceConfig) -> Result<Self, RaceError> {
        if config.engines.is_empty() {
            return Err(RaceError::NoEngines);
        }
        Ok(Self { config })
    }

    pub fn config(&self) -> &RaceConfig {
        &self.config
    }

    /// Race on `formula` with host memory sampling and no external cancellation.
    pub fn run(&self, formula: Formula) -> Result<RaceReport, RaceError> {
        self.run_with(
            Arc::new(formula),
            Box::new(SystemMemory::new()),
            &CancelFlag::new(),
        )
    }

    /// Race on `formula`, sampling memory through `probe`.
    ///
    /// Blocks until the race concludes and every worker has been reaped.
    pub fn run_with(
        &self,
        formula: Arc<Formula>,
        mut probe: Box<dyn MemoryProbe>,
        cancel: &CancelFlag,
    ) -> Result<RaceReport, RaceError> {
        let handle = RaceHandle::new(formula, self.config.worker.clone(), self.config.timeout);
        let mut peak = 0.0f64;

        // Launch one engine at a time, stopping early under memory pressure.
        let engines = &self.config.engines;
        for (i, &engine) in engines.iter().enumerate() {
            match handle.launch(engine) {
                Ok(true) => {}
                Ok(false) => break,
                Err(source) => {
                    handle.terminate(Outcome::EngineError(format!("failed to start {engine}")));
                    handle.join_runners();
                    return Err(RaceError::Spawn { engine, source });
                }
            }
            let used = probe.used_percent();
            peak = peak.max(used);
            if i + 1 < engines.len() && used > self.config.supervisor.high_watermark {
                warn!(
                    used_percent = used,
                    launched = i + 1,
                    "memory above high watermark, not launching more engines"
                );
                break;
            }
        }

        handle.finish_launching();

        let supervisor = ResourceSupervisor::new(self.config.supervisor.clone());
        let supervisor_thread = supervisor.spawn(handle.clone(), probe, cancel.clone());

        let done = handle.concluded();
        let remaining = handle.deadline().saturating_duration_since(Instant::now());
        crossbeam::select! {
            recv(done) -> _ => {}
            recv(channel::after(remaining + Duration::from_millis(50))) -> _ => {
                // The supervisor normally enforces the deadline; this is the backstop.
                if handle.terminate(Outcome::TimedOut) {
                    debug!("deadline enforced by race driver");
                }
            }
        }

        match supervisor_thread.join() {
            Ok(stats) => peak = peak.max(stats.peak_percent),
            Err(_) => warn!("supervisor thread panicked"),
        }
        handle.join_runners();
        Ok(handle.report(peak))
    }
}

/// Shared handle to a race. Clones refer to the same race.
#[derive(Clone)]
pub struct RaceHandle {
    inner: Arc<RaceInner>,
}

struct RaceInner {
    formula: Arc<Formula>,
    worker: WorkerCommand,
    started: Instant,
    deadline: Instant,
    done: Receiver<()>,
    state: Mutex<RaceState>,
}

impl RaceHandle {
    pub fn new(formula: Arc<Formula>, worker: WorkerCommand, timeout: Duration) -> Self {
        let (tx, rx) = channel::bounded(0);
        let started = Instant::now();
        Self {
            inner: Arc::new(RaceInner {
                formula,
                worker,
                started,
                deadline: started + timeout,
                done: rx,
                state: Mutex::new(RaceState::new(tx)),
            }),
        }
    }

    pub fn formula(&self) -> &Formula {
        &self.inner.formula
    }

    pub fn deadline(&self) -> Instant {
        self.inner.deadline
    }

    pub fn deadline_passed(&self) -> bool {
        Instant::now() >= self.inner.deadline
    }

    pub fn status(&self) -> RaceStatus {
        self.inner.state.lock().status
    }

    pub fn is_concluded(&self) -> bool {
        self.status() == RaceStatus::Concluded
    }

    pub fn is_degraded(&self) -> bool {
        self.inner.state.lock().degraded
    }

    /// Workers the race still owns and has not reaped.
    pub fn live_workers(&self) -> usize {
        self.inner.state.lock().live_workers()
    }

    /// Disconnects when the race concludes.
    pub fn concluded(&self) -> Receiver<()> {
        self.inner.done.clone()
    }

    /// The published result, once there is one.
    pub fn result(&self) -> Option<Outcome> {
        self.inner.state.lock().result.clone()
    }

    /// Launch a worker for `engine` in the current generation.
    ///
    /// Returns `Ok(false)` without launching when the race has concluded.
    pub fn launch(&self, engine: Engine) -> std::io::Result<bool> {
        let mut state = self.inner.state.lock();
        self.launch_locked(&mut state, engine)
    }

    fn launch_locked(&self, state: &mut RaceState, engine: Engine) -> std::io::Result<bool> {
        if state.status == RaceStatus::Concluded {
            return Ok(false);
        }
        let (runner, pipes) = EngineRunner::spawn(&self.inner.worker, engine)?;

        let slot_id = state.next_slot;
        state.next_slot += 1;
        let generation = state.generation;
        state.worker_pids.push(runner.pid());
        state.engines_launched.push(engine);
        state.slots.push(RunnerSlot {
            id: slot_id,
            generation,
            engine,
            runner: Some(runner),
        });
        state.pending += 1;
        state.status = RaceStatus::Running;
        info!(%engine, generation, "engine launched");

        let handle = self.clone();
        let thread = thread::Builder::new()
            .name(format!("runner-{engine}"))
            .spawn(move || handle.drive_runner(slot_id, generation, engine, pipes));
        match thread {
            Ok(join) => {
                state.threads.push(join);
                Ok(true)
            }
            Err(e) => {
                if let Some(mut runner) = state.take_runner(slot_id) {
                    runner.kill();
                }
                state.pending -= 1;
                Err(e)
            }
        }
    }

    fn drive_runner(&self, slot_id: u64, generation: u64, engine: Engine, pipes: RunnerPipes) {
        let collected = pipes.exchange(
            engine,
            &self.inner.formula,
            self.inner.worker.memory_limit_bytes,
        );

        let runner = self.inner.state.lock().take_runner(slot_id);
        let Some(mut runner) = runner else {
            debug!(%engine, generation, "worker was terminated by the race");
            return;
        };
        let status = runner.wait();
        let outcome = crate::runner::interpret(&collected, status, &self.inner.formula);
        self.offer(generation, engine, outcome);
    }

    /// Submit a runner's outcome. The first definitive outcome of the current
    /// generation wins; anything after conclusion is recorded and ignored.
    pub(crate) fn offer(&self, generation: u64, engine: Engine, outcome: Outcome) {
        let mut state = self.inner.state.lock();
        let accepted = state.status != RaceStatus::Concluded && generation == state.generation;
        state.reports.push(RunnerReport {
            engine,
            generation,
            outcome: outcome.label(),
            detail: outcome.detail().map(str::to_string),
            elapsed: self.inner.started.elapsed(),
            accepted,
        });
        if !accepted {
            debug!(%engine, generation, outcome = outcome.label(), "discarding late result");
            return;
        }
        state.pending = state.pending.saturating_sub(1);

        if outcome.is_definitive() {
            info!(%engine, outcome = outcome.label(), "engine won the race");
            state.publish(outcome, Some(engine));
            state.kill_all();
            return;
        }

        match &outcome {
            Outcome::EngineError(detail) => warn!(%engine, %detail, "engine failed"),
            other => info!(%engine, outcome = other.label(), "engine gave up"),
        }
        if state.pending == 0 && !state.launching {
            info!("no engine reached a verdict");
            state.publish(Outcome::Unknown, None);
            state.kill_all();
        }
    }

    /// Mark the initial launches complete.
    ///
    /// Until then, runners that all finish without a verdict do not conclude
    /// the race, since more engines may still be on the way.
    pub fn finish_launching(&self) {
        let mut state = self.inner.state.lock();
        state.launching = false;
        if state.pending == 0 && state.status == RaceStatus::Running {
            info!("no engine reached a verdict");
            state.publish(Outcome::Unknown, None);
            state.kill_all();
        }
    }

    /// Conclude with `outcome` unless a result is already published.
    pub fn terminate(&self, outcome: Outcome) -> bool {
        let mut state = self.inner.state.lock();
        let label = outcome.label();
        if !state.publish(outcome, None) {
            return false;
        }
        info!(outcome = label, "race terminated");
        state.kill_all();
        true
    }

    /// Conclude as cancelled.
    pub fn cancel(&self) -> bool {
        let mut state = self.inner.state.lock();
        if !state.publish(Outcome::Unknown, None) {
            return false;
        }
        state.cancelled = true;
        info!("race cancelled");
        state.kill_all();
        true
    }

    /// Replace the running engines with `preferred` alone.
    ///
    /// Happens at most once per race. When exactly one engine is running it is
    /// kept and the race is only marked degraded.
    pub fn degrade_to_single_engine(&self, preferred: Engine) -> bool {
        let mut state = self.inner.state.lock();
        if state.status == RaceStatus::Concluded || state.degraded {
            return false;
        }
        state.degraded = true;
        state.degradations += 1;

        let current = state.current_engines();
        if current.len() == 1 {
            info!(engine = %current[0], "memory critical, already running a single engine");
            return true;
        }

        warn!(%preferred, replaced = current.len(), "memory critical, degrading to a single engine");
        state.kill_all();
        state.generation += 1;
        state.pending = 0;
        if let Err(e) = self.launch_locked(&mut state, preferred) {
            state.publish(
                Outcome::EngineError(format!("failed to relaunch {preferred}: {e}")),
                None,
            );
        }
        true
    }

    /// Join every runner thread and reap anything left behind.
    pub fn join_runners(&self) {
        // Take the handles out first; runner threads need the lock to finish.
        loop {
            let threads = std::mem::take(&mut self.inner.state.lock().threads);
            if threads.is_empty() {
                break;
            }
            for thread in threads {
                if thread.join().is_err() {
                    warn!("runner thread panicked");
                }
            }
        }
        self.inner.state.lock().kill_all();
    }

    fn report(&self, peak_memory_percent: f64) -> RaceReport {
        let mut state = self.inner.state.lock();
        RaceReport {
            outcome: state.result.clone().unwrap_or(Outcome::Unknown),
            winner: state.winner,
            elapsed: self.inner.started.elapsed(),
            degraded: state.degraded,
            degradations: state.degradations,
            engines_launched: state.engines_launched.clone(),
            worker_pids: state.worker_pids.clone(),
            runner_reports: std::mem::take(&mut state.reports),
            peak_memory_percent,
            cancelled: state.cancelled,
        }
    }
}
