//! Deadline and memory-pressure enforcement for a running race.
//!
//! The supervisor wakes every poll interval until the race concludes:
//!
//! 1. cancellation concludes the race as cancelled,
//! 2. a passed deadline concludes it as `TimedOut`,
//! 3. memory above the critical watermark degrades the race to one engine the
//!    first time and concludes it as `ResourceExhausted` the second time.

use std::collections::VecDeque;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sysinfo::System;
use tracing::{debug, error, warn};

use crate::engine::Engine;
use crate::outcome::Outcome;
use crate::race::{CancelFlag, RaceHandle};

/// Source of host memory readings, as percent used.
pub trait MemoryProbe: Send {
    fn used_percent(&mut self) -> f64;
}

/// Reads host memory through sysinfo.
pub struct SystemMemory {
    system: System,
}

impl SystemMemory {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }
}

impl Default for SystemMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProbe for SystemMemory {
    fn used_percent(&mut self) -> f64 {
        self.system.refresh_memory();
        let total = self.system.total_memory();
        if total == 0 {
            return 0.0;
        }
        let used = total.saturating_sub(self.system.available_memory());
        used as f64 / total as f64 * 100.0
    }
}

/// Replays fixed readings, then repeats the last one. For simulated pressure.
#[derive(Debug, Clone)]
pub struct ScriptedProbe {
    readings: VecDeque<f64>,
    last: f64,
}

impl ScriptedProbe {
    pub fn new(readings: impl IntoIterator<Item = f64>) -> Self {
        Self {
            readings: readings.into_iter().collect(),
            last: 0.0,
        }
    }

    pub fn constant(percent: f64) -> Self {
        Self::new([percent])
    }
}

impl MemoryProbe for ScriptedProbe {
    fn used_percent(&mut self) -> f64 {
        if let Some(next) = self.readings.pop_front() {
            self.last = next;
        }
        self.last
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupervisorConfig {
    #[serde(with = "millis")]
    pub poll_interval: Duration,
    /// Above this, no further engines are launched.
    pub high_watermark: f64,
    /// Above this, degrade; above it again after degrading, give up.
    pub critical_watermark: f64,
    /// Engine kept when degrading.
    pub preferred_engine: Engine,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            high_watermark: 90.0,
            critical_watermark: 95.0,
            preferred_engine: Engine::Varisat,
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

/// What the supervisor saw and did during one race.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SupervisorStats {
    pub samples: u64,
    pub peak_percent: f64,
    pub degradations: u32,
    pub timed_out: bool,
    pub exhausted: bool,
    pub cancelled: bool,
}

pub struct ResourceSupervisor {
    config: SupervisorConfig,
}

impl ResourceSupervisor {
    pub fn new(config: SupervisorConfig) -> Self {
        Self { config }
    }

    pub fn spawn(
        self,
        race: RaceHandle,
        probe: Box<dyn MemoryProbe>,
        cancel: CancelFlag,
    ) -> JoinHandle<SupervisorStats> {
        thread::spawn(move || self.run(&race, probe, &cancel))
    }

    /// Supervise `race` until it concludes.
    pub fn run(
        &self,
        race: &RaceHandle,
        mut probe: Box<dyn MemoryProbe>,
        cancel: &CancelFlag,
    ) -> SupervisorStats {
        let mut stats = SupervisorStats::default();
        let done = race.concluded();

        loop {
            crossbeam::select! {
                recv(done) -> _ => break,
                default(self.config.poll_interval) => {}
            }

            if cancel.is_cancelled() {
                stats.cancelled = race.cancel();
                break;
            }

            // The deadline outranks memory pressure.
            if race.deadline_passed() {
                stats.timed_out = race.terminate(Outcome::TimedOut);
                break;
            }

            let used = probe.used_percent();
            stats.samples += 1;
            stats.peak_percent = stats.peak_percent.max(used);
            debug!(used_percent = used, "memory sample");

            if used <= self.config.critical_watermark {
                continue;
            }
            if !race.is_degraded() {
                warn!(used_percent = used, "memory critical");
                if race.degrade_to_single_engine(self.config.preferred_engine) {
                    stats.degradations += 1;
                }
            } else {
                error!(used_percent = used, "memory still critical after degrading");
                stats.exhausted = race.terminate(Outcome::ResourceExhausted);
                break;
            }
        }

        stats
    }
}
