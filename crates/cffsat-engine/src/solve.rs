//! In-process adapters for each engine.
//!
//! These run inside the worker process. Each adapter feeds the formula to its
//! engine and reports a [`Verdict`]; panics inside an engine become
//! [`Verdict::Failed`]. An allocation failure aborts the process instead, and
//! the parent classifies that from the exit status.

use std::panic::{self, AssertUnwindSafe};

use cffsat_formula::{Formula, Witness};
use serde::{Deserialize, Serialize};

use crate::engine::Engine;
use crate::outcome::Outcome;

/// What an engine reported, before the parent has checked it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "data", rename_all = "lowercase")]
pub enum Verdict {
    /// A model as signed DIMACS literals.
    Sat(Vec<i32>),
    Unsat,
    Unknown,
    OutOfMemory,
    Failed(String),
}

impl Verdict {
    /// Convert into an [`Outcome`], checking any model against `formula`.
    ///
    /// A model that falsifies a clause is an engine error, never a result.
    pub fn into_outcome(self, formula: &Formula) -> Outcome {
        match self {
            Verdict::Sat(model) => {
                let witness = Witness::from_model(&model, formula.num_vars());
                match formula.first_violated(&witness) {
                    None => Outcome::Satisfiable(witness),
                    Some(index) => Outcome::EngineError(format!(
                        "witness violates clause {index}"
                    )),
                }
            }
            Verdict::Unsat => Outcome::Unsatisfiable,
            Verdict::Unknown => Outcome::Unknown,
            Verdict::OutOfMemory => Outcome::ResourceExhausted,
            Verdict::Failed(detail) => Outcome::EngineError(detail),
        }
    }
}

/// Run `engine` on `formula` in the current process.
pub fn solve(engine: Engine, formula: &Formula) -> Verdict {
    let result = panic::catch_unwind(AssertUnwindSafe(|| match engine {
        Engine::Varisat => solve_varisat(formula),
        Engine::Splr => solve_splr(formula),
        Engine::Batsat => solve_batsat(formula),
    }));
    match result {
        Ok(verdict) => verdict,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Verdict::Failed(format!("{engine} panicked: {message}"))
        }
    }
}

fn solve_varisat(formula: &Formula) -> Verdict {
    use varisat::{ExtendFormula, Lit, Solver};

    let mut solver = Solver::new();
    let mut lits = Vec::new();
    for clause in formula.clauses() {
        lits.clear();
        lits.extend(clause.iter().map(|&l| Lit::from_dimacs(l as isize)));
        solver.add_clause(&lits);
    }

    match solver.solve() {
        Ok(true) => match solver.model() {
            Some(model) => Verdict::Sat(model.iter().map(|l| l.to_dimacs() as i32).collect()),
            None => Verdict::Failed("varisat reported SAT without a model".into()),
        },
        Ok(false) => Verdict::Unsat,
        Err(e) => Verdict::Failed(format!("varisat: {e}")),
    }
}

fn solve_splr(formula: &Formula) -> Verdict {
    use splr::{Certificate, SolverError};

    // splr refuses an empty clause set; the empty conjunction is trivially true.
    if formula.is_empty() {
        return Verdict::Sat(Vec::new());
    }

    match Certificate::try_from(formula.clauses().to_vec()) {
        Ok(Certificate::SAT(model)) => Verdict::Sat(model),
        Ok(Certificate::UNSAT) => Verdict::Unsat,
        Err(SolverError::EmptyClause) | Err(SolverError::Inconsistent) => Verdict::Unsat,
        Err(SolverError::OutOfMemory) => Verdict::OutOfMemory,
        Err(e) => Verdict::Failed(format!("splr: {e:?}")),
    }
}

fn solve_batsat(formula: &Formula) -> Verdict {
    use batsat::{lbool, BasicSolver, Lit, SolverInterface, Var};

    let mut solver = BasicSolver::default();
    let vars: Vec<Var> = (0..formula.num_vars())
        .map(|_| solver.new_var_default())
        .collect();

    let mut lits = Vec::new();
    for clause in formula.clauses() {
        lits.clear();
        lits.extend(
            clause
                .iter()
                .map(|&l| Lit::new(vars[l.unsigned_abs() as usize - 1], l > 0)),
        );
        if !solver.add_clause_reuse(&mut lits) {
            return Verdict::Unsat;
        }
    }

    let result = solver.solve_limited(&[]);
    if result == lbool::TRUE {
        let model = vars
            .iter()
            .enumerate()
            .map(|(i, &v)| {
                let var = (i + 1) as i32;
                if solver.value_var(v) == lbool::TRUE {
                    var
                } else {
                    -var
                }
            })
            .collect();
        Verdict::Sat(model)
    } else if result == lbool::FALSE {
        Verdict::Unsat
    } else {
        Verdict::Unknown
    }
}
