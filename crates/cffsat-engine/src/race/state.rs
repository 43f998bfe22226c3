//! Shared race state, guarded by one lock.

use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam::channel::Sender;
use tracing::debug;

use crate::engine::Engine;
use crate::outcome::Outcome;
use crate::runner::EngineRunner;

/// Lifecycle of a race.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RaceStatus {
    /// Created, nothing launched yet.
    Pending,
    Running,
    /// A result has been published. Terminal.
    Concluded,
}

/// What one runner reported, whether or not the race used it.
#[derive(Debug, Clone, PartialEq)]
pub struct RunnerReport {
    pub engine: Engine,
    pub generation: u64,
    pub outcome: &'static str,
    pub detail: Option<String>,
    pub elapsed: Duration,
    /// False when the result arrived after conclusion or from a replaced generation.
    pub accepted: bool,
}

pub(crate) struct RunnerSlot {
    pub id: u64,
    pub generation: u64,
    pub engine: Engine,
    /// Taken by the runner thread once the worker closes stdout, or by the
    /// race when it kills the worker.
    pub runner: Option<EngineRunner>,
}

pub(crate) struct RaceState {
    pub status: RaceStatus,
    pub generation: u64,
    pub next_slot: u64,
    pub slots: Vec<RunnerSlot>,
    /// Runners of the current generation that have not reported.
    pub pending: usize,
    /// Set while the initial engines are still being launched.
    pub launching: bool,
    pub degraded: bool,
    pub degradations: u32,
    pub cancelled: bool,
    pub result: Option<Outcome>,
    pub winner: Option<Engine>,
    pub reports: Vec<RunnerReport>,
    pub engines_launched: Vec<Engine>,
    pub worker_pids: Vec<u32>,
    pub threads: Vec<JoinHandle<()>>,
    /// Dropped on conclusion; receivers observe the disconnect.
    pub done: Option<Sender<()>>,
}

impl RaceState {
    pub fn new(done: Sender<()>) -> Self {
        Self {
            status: RaceStatus::Pending,
            generation: 0,
            next_slot: 0,
            slots: Vec::new(),
            pending: 0,
            launching: true,
            degraded: false,
            degradations: 0,
            cancelled: false,
            result: None,
            winner: None,
            reports: Vec::new(),
            engines_launched: Vec::new(),
            worker_pids: Vec::new(),
            threads: Vec::new(),
            done: Some(done),
        }
    }

    /// Record the race result. Only the first call has any effect.
    pub fn publish(&mut self, outcome: Outcome, winner: Option<Engine>) -> bool {
        if self.result.is_some() {
            return false;
        }
        self.result = Some(outcome);
        self.winner = winner;
        self.status = RaceStatus::Concluded;
        self.done.take();
        true
    }

    pub fn take_runner(&mut self, slot_id: u64) -> Option<EngineRunner> {
        self.slots
            .iter_mut()
            .find(|slot| slot.id == slot_id)
            .and_then(|slot| slot.runner.take())
    }

    /// Kill and reap every worker still owned by the race.
    pub fn kill_all(&mut self) {
        for slot in &mut self.slots {
            if let Some(mut runner) = slot.runner.take() {
                debug!(engine = %slot.engine, generation = slot.generation, pid = runner.pid(), "killing worker");
                runner.kill();
            }
        }
    }

    pub fn live_workers(&self) -> usize {
        self.slots.iter().filter(|slot| slot.runner.is_some()).count()
    }

    /// Engines of the current generation whose workers are still running.
    pub fn current_engines(&self) -> Vec<Engine> {
        self.slots
            .iter()
            .filter(|slot| slot.generation == self.generation && slot.runner.is_some())
            .map(|slot| slot.engine)
            .collect()
    }
}
