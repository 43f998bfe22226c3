//! Parameter sweeps: cache first, race on a miss, merge, pick the next key.
//!
//! `Grow` mode searches for the largest family for each ground-set size: it
//! adds blocks while the instance stays satisfiable, then moves to the next
//! ground-set size and starts again from `n = t`.

use std::sync::Arc;
use std::time::Duration;

use cffsat_engine::{CancelFlag, Outcome, Race, RaceConfig, RaceError, RaceReport, SystemMemory};
use cffsat_formula::{blocks_from_witness, encode, is_cover_free, EncodeError, Encoding, Formula, ProblemKey};
use tracing::{info, warn};

use crate::cache::{CacheError, CacheLookup, OutcomeCache, RecordMeta, Solution};
use crate::config::ExhaustedPolicy;

#[derive(Debug, thiserror::Error)]
pub enum SweepError {
    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Race(#[from] RaceError),

    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Runs one race per uncached instance.
pub trait RaceLauncher {
    fn launch(&mut self, key: &ProblemKey, formula: Formula) -> Result<RaceReport, RaceError>;
}

/// Races real worker processes under host memory supervision.
pub struct ProcessRaceLauncher {
    race: Race,
    cancel: CancelFlag,
}

impl ProcessRaceLauncher {
    pub fn new(config: RaceConfig, cancel: CancelFlag) -> Result<Self, RaceError> {
        Ok(Self {
            race: Race::new(config)?,
            cancel,
        })
    }
}

impl RaceLauncher for ProcessRaceLauncher {
    fn launch(&mut self, key: &ProblemKey, formula: Formula) -> Result<RaceReport, RaceError> {
        info!(%key, vars = formula.num_vars(), clauses = formula.len(), "racing");
        self.race
            .run_with(Arc::new(formula), Box::new(SystemMemory::new()), &self.cancel)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SweepMode {
    /// Grow `n` while satisfiable; on failure move to `t + 1`, `n = t + 1`.
    Grow {
        degree: u32,
        start_t: u32,
        start_n: u32,
        max_t: Option<u32>,
    },
    /// An explicit list of `(t, n)` instances.
    Points { degree: u32, points: Vec<(u32, u32)> },
    Single { degree: u32, t: u32, n: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepSource {
    Cached,
    Computed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepReport {
    pub key: ProblemKey,
    pub solution: Solution,
    pub source: StepSource,
    pub clauses: u64,
    pub elapsed_secs: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The configured `max_t` was passed.
    Bound,
    /// A step ran out of memory and the policy is to halt.
    Exhausted,
    Interrupted,
    /// Every requested instance was evaluated.
    Completed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SweepSummary {
    pub steps: Vec<StepReport>,
    pub stop_reason: StopReason,
}

pub struct SweepController<L> {
    cache: OutcomeCache,
    launcher: L,
    timeout: Duration,
    encoding: Encoding,
    on_exhausted: ExhaustedPolicy,
    interrupt: CancelFlag,
}

impl<L: RaceLauncher> SweepController<L> {
    pub fn new(
        cache: OutcomeCache,
        launcher: L,
        timeout: Duration,
        encoding: Encoding,
        on_exhausted: ExhaustedPolicy,
        interrupt: CancelFlag,
    ) -> Self {
        Self {
            cache,
            launcher,
            timeout,
            encoding,
            on_exhausted,
            interrupt,
        }
    }

    pub fn cache(&self) -> &OutcomeCache {
        &self.cache
    }

    pub fn launcher(&self) -> &L {
        &self.launcher
    }

    pub fn run(&mut self, mode: &SweepMode) -> Result<SweepSummary, SweepError> {
        let mut steps = Vec::new();
        let stop_reason = match mode {
            SweepMode::Grow {
                degree,
                start_t,
                start_n,
                max_t,
            } => self.grow(*degree, *start_t, *start_n, *max_t, &mut steps)?,
            SweepMode::Points { degree, points } => {
                self.points(*degree, points.iter().copied(), &mut steps)?
            }
            SweepMode::Single { degree, t, n } => {
                self.points(*degree, std::iter::once((*t, *n)), &mut steps)?
            }
        };
        info!(steps = steps.len(), ?stop_reason, "sweep finished");
        Ok(SweepSummary { steps, stop_reason })
    }

    fn grow(
        &mut self,
        degree: u32,
        start_t: u32,
        start_n: u32,
        max_t: Option<u32>,
        steps: &mut Vec<StepReport>,
    ) -> Result<StopReason, SweepError> {
        let mut t = start_t.max(degree + 1);
        let mut n = start_n.max(t);
        loop {
            if max_t.is_some_and(|max| t > max) {
                return Ok(StopReason::Bound);
            }
            let Some(step) = self.step(ProblemKey::new(degree, t, n))? else {
                return Ok(StopReason::Interrupted);
            };
            let solution = step.solution.clone();
            steps.push(step);

            if solution.is_satisfiable() {
                n += 1;
                continue;
            }
            if solution.is_exhausted() && self.on_exhausted == ExhaustedPolicy::Halt {
                return Ok(StopReason::Exhausted);
            }
            t += 1;
            n = t;
        }
    }

    fn points(
        &mut self,
        degree: u32,
        points: impl Iterator<Item = (u32, u32)>,
        steps: &mut Vec<StepReport>,
    ) -> Result<StopReason, SweepError> {
        for (t, n) in points {
            let Some(step) = self.step(ProblemKey::new(degree, t, n))? else {
                return Ok(StopReason::Interrupted);
            };
            let exhausted = step.solution.is_exhausted();
            steps.push(step);
            if exhausted && self.on_exhausted == ExhaustedPolicy::Halt {
                return Ok(StopReason::Exhausted);
            }
        }
        Ok(StopReason::Completed)
    }

    /// Evaluate one instance. `None` when the sweep was interrupted; nothing is
    /// recorded for an interrupted race.
    pub fn step(&mut self, key: ProblemKey) -> Result<Option<StepReport>, SweepError> {
        if self.interrupt.is_cancelled() {
            return Ok(None);
        }
        let key = key.with_encoding(self.encoding);
        let timeout_secs = self.timeout.as_secs_f64();

        match self.cache.classify(&key, timeout_secs) {
            CacheLookup::Hit(record) => {
                info!(%key, solution = record.solution.label(), "cached");
                return Ok(Some(StepReport {
                    key,
                    solution: record.solution,
                    source: StepSource::Cached,
                    clauses: record.clauses,
                    elapsed_secs: record.time,
                }));
            }
            CacheLookup::Stale(record) => {
                info!(%key, cached_secs = record.time, timeout_secs, "retrying with a larger budget");
            }
            CacheLookup::Miss => {}
        }

        let formula = encode(&key)?;
        let clauses = formula.len() as u64;
        let report = self.launcher.launch(&key, formula)?;
        // An interrupt can end the race through its workers before the
        // supervisor sees the flag, so the flag decides.
        if report.cancelled || self.interrupt.is_cancelled() {
            warn!(%key, outcome = report.outcome.label(), "race interrupted, nothing recorded");
            return Ok(None);
        }

        if let Outcome::Satisfiable(witness) = &report.outcome {
            let blocks = blocks_from_witness(witness, key.t, key.n);
            if !is_cover_free(&blocks, key.d) {
                warn!(%key, ?blocks, "decoded family is not cover-free");
            }
        }

        let elapsed_secs = match report.outcome {
            Outcome::TimedOut => timeout_secs,
            _ => report.elapsed.as_secs_f64(),
        };
        self.cache.merge(
            key,
            &report.outcome,
            RecordMeta {
                clauses,
                elapsed_secs,
            },
        )?;

        // Report what the cache now holds; a kept definitive record wins over this race.
        let solution = self
            .cache
            .lookup(&key)
            .map(|record| record.solution)
            .unwrap_or_else(|| Solution::from_outcome(&key, &report.outcome));
        info!(
            %key,
            outcome = report.outcome.label(),
            winner = ?report.winner,
            elapsed_secs,
            degraded = report.degraded,
            "race finished"
        );
        Ok(Some(StepReport {
            key,
            solution,
            source: StepSource::Computed,
            clauses,
            elapsed_secs,
        }))
    }
}
