use std::time::Duration;

use cffsat_core::{
    CacheRecord, ExhaustedPolicy, OutcomeCache, RaceLauncher, RecordStatus, Solution, StepSource,
    StopReason, SweepController, SweepMode,
};
use cffsat_engine::solve::solve;
use cffsat_engine::{CancelFlag, Engine, Outcome, RaceError, RaceReport};
use cffsat_formula::{is_cover_free, Encoding, Formula, ProblemKey, Witness};

type Script = Box<dyn FnMut(&ProblemKey, &Formula) -> Outcome + Send>;

/// Answers races from a closure instead of worker processes.
struct ScriptedLauncher {
    script: Script,
    calls: Vec<ProblemKey>,
    cancel_on_call: Option<usize>,
}

impl ScriptedLauncher {
    fn new(script: impl FnMut(&ProblemKey, &Formula) -> Outcome + Send + 'static) -> Self {
        Self {
            script: Box::new(script),
            calls: Vec::new(),
            cancel_on_call: None,
        }
    }
}

impl RaceLauncher for ScriptedLauncher {
    fn launch(&mut self, key: &ProblemKey, formula: Formula) -> Result<RaceReport, RaceError> {
        self.calls.push(*key);
        let cancelled = self.cancel_on_call == Some(self.calls.len());
        let outcome = if cancelled {
            Outcome::Unknown
        } else {
            (self.script)(key, &formula)
        };
        Ok(RaceReport {
            outcome,
            winner: None,
            elapsed: Duration::from_millis(125),
            degraded: false,
            degradations: 0,
            engines_launched: vec![Engine::Varisat],
            worker_pids: Vec::new(),
            runner_reports: Vec::new(),
            peak_memory_percent: 0.0,
            cancelled,
        })
    }
}

/// SAT with a placeholder witness while `n <= t + 1`, UNSAT beyond.
fn staircase(key: &ProblemKey, formula: &Formula) -> Outcome {
    if key.n <= key.t + 1 {
        Outcome::Satisfiable(Witness::from_model(&[], formula.num_vars()))
    } else {
        Outcome::Unsatisfiable
    }
}

fn controller(
    cache: OutcomeCache,
    launcher: ScriptedLauncher,
    timeout_secs: u64,
    policy: ExhaustedPolicy,
) -> SweepController<ScriptedLauncher> {
    SweepController::new(
        cache,
        launcher,
        Duration::from_secs(timeout_secs),
        Encoding::Column,
        policy,
        CancelFlag::new(),
    )
}

fn tn(steps: &[cffsat_core::StepReport]) -> Vec<(u32, u32)> {
    steps.iter().map(|s| (s.key.t, s.key.n)).collect()
}

#[test]
fn test_grow_widens_after_each_failure_until_bound() {
    let dir = tempfile::tempdir().unwrap();
    let cache = OutcomeCache::open(dir.path().join("cffdata.json")).unwrap();
    let mut sweep = controller(cache, ScriptedLauncher::new(staircase), 60, ExhaustedPolicy::Halt);

    let summary = sweep
        .run(&SweepMode::Grow {
            degree: 1,
            start_t: 1,
            start_n: 1,
            max_t: Some(4),
        })
        .unwrap();

    assert_eq!(summary.stop_reason, StopReason::Bound);
    assert_eq!(
        tn(&summary.steps),
        vec![(2, 2), (2, 3), (2, 4), (3, 3), (3, 4), (3, 5), (4, 4), (4, 5), (4, 6)]
    );
    assert!(summary.steps.iter().all(|s| s.source == StepSource::Computed));
    assert_eq!(sweep.cache().len(), 9);
}

#[test]
fn test_second_sweep_is_served_from_cache() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cffdata.json");
    let mode = SweepMode::Grow {
        degree: 1,
        start_t: 2,
        start_n: 2,
        max_t: Some(3),
    };

    let mut first = controller(
        OutcomeCache::open(&path).unwrap(),
        ScriptedLauncher::new(staircase),
        60,
        ExhaustedPolicy::Halt,
    );
    first.run(&mode).unwrap();

    let mut second = controller(
        OutcomeCache::open(&path).unwrap(),
        ScriptedLauncher::new(|_: &ProblemKey, _: &Formula| -> Outcome {
            panic!("cached sweep must not race")
        }),
        60,
        ExhaustedPolicy::Halt,
    );
    let summary = second.run(&mode).unwrap();
    assert!(summary.steps.iter().all(|s| s.source == StepSource::Cached));
    assert!(second.launcher().calls.is_empty());
}

#[test]
fn test_exhaustion_halts_or_continues_per_policy() {
    let script = |key: &ProblemKey, f: &Formula| {
        if (key.t, key.n) == (3, 4) {
            Outcome::ResourceExhausted
        } else {
            staircase(key, f)
        }
    };
    let mode = SweepMode::Grow {
        degree: 1,
        start_t: 3,
        start_n: 3,
        max_t: Some(4),
    };

    let dir = tempfile::tempdir().unwrap();
    let cache = OutcomeCache::open(dir.path().join("halt.json")).unwrap();
    let summary = controller(cache, ScriptedLauncher::new(script), 60, ExhaustedPolicy::Halt)
        .run(&mode)
        .unwrap();
    assert_eq!(summary.stop_reason, StopReason::Exhausted);
    assert_eq!(tn(&summary.steps), vec![(3, 3), (3, 4)]);

    let cache = OutcomeCache::open(dir.path().join("continue.json")).unwrap();
    let summary = controller(cache, ScriptedLauncher::new(script), 60, ExhaustedPolicy::Continue)
        .run(&mode)
        .unwrap();
    assert_eq!(summary.stop_reason, StopReason::Bound);
    assert_eq!(tn(&summary.steps), vec![(3, 3), (3, 4), (4, 4), (4, 5), (4, 6)]);
}

#[test]
fn test_interrupted_race_is_not_recorded() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cffdata.json");
    let mut launcher = ScriptedLauncher::new(staircase);
    launcher.cancel_on_call = Some(2);
    let mut sweep = controller(OutcomeCache::open(&path).unwrap(), launcher, 60, ExhaustedPolicy::Halt);

    let summary = sweep
        .run(&SweepMode::Points {
            degree: 1,
            points: vec![(2, 2), (2, 3), (2, 4)],
        })
        .unwrap();
    assert_eq!(summary.stop_reason, StopReason::Interrupted);
    assert_eq!(tn(&summary.steps), vec![(2, 2)]);

    let reopened = OutcomeCache::open(&path).unwrap();
    assert_eq!(reopened.len(), 1);
    assert!(reopened.lookup(&ProblemKey::new(1, 2, 3)).is_none());
}

#[test]
fn test_interrupt_during_race_is_not_recorded_even_if_race_finished() {
    // Workers killed by the interrupt end the race as Unknown before the
    // race itself notices the flag.
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("c.json");
    let interrupt = CancelFlag::new();
    let trip = interrupt.clone();
    let launcher = ScriptedLauncher::new(move |_: &ProblemKey, _: &Formula| {
        trip.cancel();
        Outcome::EngineError("worker exited with signal: 2 (SIGINT)".into())
    });
    let mut sweep = SweepController::new(
        OutcomeCache::open(&path).unwrap(),
        launcher,
        Duration::from_secs(600),
        Encoding::Column,
        ExhaustedPolicy::Halt,
        interrupt,
    );

    let summary = sweep
        .run(&SweepMode::Points {
            degree: 1,
            points: vec![(4, 6), (4, 7)],
        })
        .unwrap();
    assert_eq!(summary.stop_reason, StopReason::Interrupted);
    assert!(summary.steps.is_empty());
    assert_eq!(sweep.launcher().calls.len(), 1);
    assert!(sweep.cache().is_empty());
    assert!(!path.exists());
}

#[test]
fn test_interrupt_flag_stops_before_the_next_step() {
    let dir = tempfile::tempdir().unwrap();
    let interrupt = CancelFlag::new();
    interrupt.cancel();
    let mut sweep = SweepController::new(
        OutcomeCache::open(dir.path().join("c.json")).unwrap(),
        ScriptedLauncher::new(staircase),
        Duration::from_secs(60),
        Encoding::Column,
        ExhaustedPolicy::Halt,
        interrupt,
    );
    let summary = sweep.run(&SweepMode::Single { degree: 1, t: 2, n: 2 }).unwrap();
    assert_eq!(summary.stop_reason, StopReason::Interrupted);
    assert!(summary.steps.is_empty());
}

#[test]
fn test_timeout_recorded_with_configured_budget() {
    let dir = tempfile::tempdir().unwrap();
    let launcher = ScriptedLauncher::new(|_: &ProblemKey, _: &Formula| Outcome::TimedOut);
    let mut sweep = controller(
        OutcomeCache::open(dir.path().join("c.json")).unwrap(),
        launcher,
        45,
        ExhaustedPolicy::Halt,
    );
    let summary = sweep.run(&SweepMode::Single { degree: 2, t: 5, n: 7 }).unwrap();
    assert_eq!(summary.steps[0].elapsed_secs, 45.0);

    let record = sweep.cache().lookup(&ProblemKey::new(2, 5, 7)).unwrap();
    assert_eq!(record.solution, Solution::Status(RecordStatus::TimedOut));
    assert_eq!(record.time, 45.0);
}

#[test]
fn test_cached_timeout_retried_only_with_larger_budget() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("c.json");
    cffsat_core::RecordStore::new(&path)
        .save(&[CacheRecord {
            d: 2,
            t: 5,
            n: 7,
            encoding: Encoding::Column,
            clauses: 100,
            time: 10.0,
            solution: Solution::Status(RecordStatus::TimedOut),
            detail: None,
        }])
        .unwrap();
    let mode = SweepMode::Single { degree: 2, t: 5, n: 7 };

    // Same budget: a durable hit.
    let mut same = controller(
        OutcomeCache::open(&path).unwrap(),
        ScriptedLauncher::new(|_: &ProblemKey, _: &Formula| Outcome::Unsatisfiable),
        10,
        ExhaustedPolicy::Halt,
    );
    let summary = same.run(&mode).unwrap();
    assert_eq!(summary.steps[0].source, StepSource::Cached);
    assert!(same.launcher().calls.is_empty());

    // Larger budget: recomputed and upgraded.
    let mut larger = controller(
        OutcomeCache::open(&path).unwrap(),
        ScriptedLauncher::new(|_: &ProblemKey, _: &Formula| Outcome::Unsatisfiable),
        60,
        ExhaustedPolicy::Halt,
    );
    let summary = larger.run(&mode).unwrap();
    assert_eq!(summary.steps[0].source, StepSource::Computed);
    assert_eq!(summary.steps[0].solution, Solution::Status(RecordStatus::Unsat));
    assert_eq!(larger.launcher().calls.len(), 1);
}

#[test]
fn test_real_engine_result_is_persisted_as_blocks() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("c.json");
    let launcher = ScriptedLauncher::new(|_: &ProblemKey, formula: &Formula| {
        solve(Engine::Varisat, formula).into_outcome(formula)
    });
    let mut sweep = controller(OutcomeCache::open(&path).unwrap(), launcher, 60, ExhaustedPolicy::Halt);
    let summary = sweep.run(&SweepMode::Single { degree: 1, t: 4, n: 6 }).unwrap();
    assert_eq!(summary.stop_reason, StopReason::Completed);

    let record = OutcomeCache::open(&path)
        .unwrap()
        .lookup(&ProblemKey::new(1, 4, 6))
        .unwrap();
    match record.solution {
        Solution::Blocks(blocks) => {
            assert_eq!(blocks.len(), 6);
            assert!(is_cover_free(&blocks, 1));
        }
        other => panic!("expected blocks, got {other:?}"),
    }
    assert!(record.clauses > 0);
}
