//! SAT encodings of "the n columns of a t x n incidence matrix form a
//! d-cover-free family".
//!
//! Primary variables are shared by every strategy: `x(r, c) = r * n + c + 1`
//! for row `r < t` and column `c < n`. Auxiliary variables follow them and are
//! private to the strategy that allocated them.
//!
//! - **Column**: for each column `c` and each `d`-subset `S` of the other
//!   columns, some row contains `c` and no column of `S`.
//! - **Subset**: for each `(d+1)`-subset `C`, every column of `C` has a row it
//!   owns exclusively within `C`.

use std::str::FromStr;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::formula::{Clause, Formula, FormulaError};
use crate::key::ProblemKey;

/// Encoder strategy.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    #[default]
    Column,
    Subset,
}

impl Encoding {
    pub const ALL: [Encoding; 2] = [Encoding::Column, Encoding::Subset];

    pub fn name(&self) -> &'static str {
        match self {
            Encoding::Column => "column",
            Encoding::Subset => "subset",
        }
    }
}

impl std::fmt::Display for Encoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Encoding {
    type Err = EncodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Encoding::ALL
            .into_iter()
            .find(|e| e.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| EncodeError::UnknownEncoding(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodeError {
    #[error("unknown encoding '{0}' (expected one of: column, subset)")]
    UnknownEncoding(String),

    #[error("parameter {name} must be at least 1")]
    ZeroParameter { name: &'static str },

    #[error("instance {key} needs more variables than a DIMACS literal can hold")]
    TooLarge { key: ProblemKey },

    #[error("encoder produced an invalid formula: {0}")]
    Formula(#[from] FormulaError),
}

/// Hands out fresh variable indices after the primary block.
struct VarAllocator {
    key: ProblemKey,
    next: i64,
}

impl VarAllocator {
    fn new(key: ProblemKey) -> Self {
        Self {
            key,
            next: i64::from(key.primary_vars()) + 1,
        }
    }

    fn fresh(&mut self) -> Result<i32, EncodeError> {
        let var = i32::try_from(self.next).map_err(|_| EncodeError::TooLarge { key: self.key })?;
        self.next += 1;
        Ok(var)
    }

    fn num_vars(&self) -> u32 {
        (self.next - 1) as u32
    }
}

/// Encode `key` into a formula using the strategy named in the key.
pub fn encode(key: &ProblemKey) -> Result<Formula, EncodeError> {
    for (name, value) in [("d", key.d), ("t", key.t), ("n", key.n)] {
        if value == 0 {
            return Err(EncodeError::ZeroParameter { name });
        }
    }
    if i32::try_from(u64::from(key.t) * u64::from(key.n)).is_err() {
        return Err(EncodeError::TooLarge { key: *key });
    }

    let mut vars = VarAllocator::new(*key);
    let clauses = match key.encoding {
        Encoding::Column => encode_column(key, &mut vars)?,
        Encoding::Subset => encode_subset(key, &mut vars)?,
    };
    Ok(Formula::new(vars.num_vars(), clauses)?)
}

fn primary(key: &ProblemKey, row: u32, column: u32) -> i32 {
    (row * key.n + column + 1) as i32
}

fn encode_column(key: &ProblemKey, vars: &mut VarAllocator) -> Result<Vec<Clause>, EncodeError> {
    let mut clauses = Vec::new();

    for column in 0..key.n {
        let others = (0..key.n).filter(|&c| c != column);
        for covering in others.combinations(key.d as usize) {
            let mut witnesses = Vec::with_capacity(key.t as usize);
            for row in 0..key.t {
                let y = vars.fresh()?;
                witnesses.push(y);
                clauses.push(vec![primary(key, row, column), -y]);
                for &other in &covering {
                    clauses.push(vec![-primary(key, row, other), -y]);
                }
            }
            clauses.push(witnesses);
        }
    }

    Ok(clauses)
}

fn encode_subset(key: &ProblemKey, vars: &mut VarAllocator) -> Result<Vec<Clause>, EncodeError> {
    let mut clauses = Vec::new();
    let width = key.d as usize + 1;

    for selected in (0..key.n).combinations(width) {
        // owner[row][j]: row `row` belongs to selected[j] and to no other selected column.
        let mut owner = Vec::with_capacity(key.t as usize);
        for _ in 0..key.t {
            let mut row_vars = Vec::with_capacity(width);
            for _ in 0..width {
                row_vars.push(vars.fresh()?);
            }
            owner.push(row_vars);
        }

        for (row, row_vars) in owner.iter().enumerate() {
            for (j, &w) in row_vars.iter().enumerate() {
                for (k, &column) in selected.iter().enumerate() {
                    let x = primary(key, row as u32, column);
                    clauses.push(if j == k { vec![-w, x] } else { vec![-w, -x] });
                }
            }
        }

        for j in 0..width {
            clauses.push(owner.iter().map(|row_vars| row_vars[j]).collect());
        }
    }

    Ok(clauses)
}
