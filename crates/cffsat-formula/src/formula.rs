//! CNF formulas over a numbered variable space, and truth assignments for them.
//!
//! Literals use the DIMACS convention: variable `v` is `v`, its negation `-v`,
//! and `0` is never a literal.

use serde::{Deserialize, Serialize};

/// A disjunction of signed literals.
pub type Clause = Vec<i32>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormulaError {
    #[error("clause {index} is empty")]
    EmptyClause { index: usize },

    #[error("clause {index} contains the literal 0")]
    ZeroLiteral { index: usize },

    #[error("clause {index} mentions variable {var}, but the formula only has {num_vars}")]
    VariableOutOfRange { index: usize, var: u32, num_vars: u32 },
}

/// A conjunction of clauses. Immutable once built.
///
/// Deserializing goes through [`Formula::new`], so a formula read off the wire
/// is as checked as one built in process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "UncheckedFormula")]
pub struct Formula {
    num_vars: u32,
    clauses: Vec<Clause>,
}

#[derive(Deserialize)]
struct UncheckedFormula {
    num_vars: u32,
    clauses: Vec<Clause>,
}

impl TryFrom<UncheckedFormula> for Formula {
    type Error = FormulaError;

    fn try_from(raw: UncheckedFormula) -> Result<Self, Self::Error> {
        Formula::new(raw.num_vars, raw.clauses)
    }
}

impl Formula {
    /// Build a formula, checking every literal against the variable space.
    pub fn new(num_vars: u32, clauses: Vec<Clause>) -> Result<Self, FormulaError> {
        for (index, clause) in clauses.iter().enumerate() {
            if clause.is_empty() {
                return Err(FormulaError::EmptyClause { index });
            }
            for &lit in clause {
                if lit == 0 {
                    return Err(FormulaError::ZeroLiteral { index });
                }
                let var = lit.unsigned_abs();
                if var > num_vars {
                    return Err(FormulaError::VariableOutOfRange {
                        index,
                        var,
                        num_vars,
                    });
                }
            }
        }
        Ok(Self { num_vars, clauses })
    }

    pub fn num_vars(&self) -> u32 {
        self.num_vars
    }

    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    pub fn len(&self) -> usize {
        self.clauses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Index of the first clause the witness falsifies, if any.
    pub fn first_violated(&self, witness: &Witness) -> Option<usize> {
        self.clauses.iter().position(|clause| {
            !clause
                .iter()
                .any(|&lit| witness.value(lit.unsigned_abs()) == Some(lit > 0))
        })
    }

    pub fn is_satisfied_by(&self, witness: &Witness) -> bool {
        self.first_violated(witness).is_none()
    }
}

/// A total assignment for variables `1..=num_vars`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Witness {
    values: Vec<bool>,
}

impl Witness {
    /// Build a witness from an engine model given as signed literals.
    ///
    /// Variables the model does not mention are false; literals beyond
    /// `num_vars` (engine-internal variables) are dropped.
    pub fn from_model(model: &[i32], num_vars: u32) -> Self {
        let mut values = vec![false; num_vars as usize];
        for &lit in model {
            let var = lit.unsigned_abs() as usize;
            if var >= 1 && var <= values.len() {
                values[var - 1] = lit > 0;
            }
        }
        Self { values }
    }

    pub fn num_vars(&self) -> u32 {
        self.values.len() as u32
    }

    /// Truth value of `var`, or `None` when `var` is outside the assignment.
    pub fn value(&self, var: u32) -> Option<bool> {
        if var == 0 {
            return None;
        }
        self.values.get(var as usize - 1).copied()
    }

    /// The assignment as signed literals, one per variable.
    pub fn literals(&self) -> Vec<i32> {
        self.values
            .iter()
            .enumerate()
            .map(|(i, &v)| {
                let var = (i + 1) as i32;
                if v {
                    var
                } else {
                    -var
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_empty_clause() {
        let err = Formula::new(2, vec![vec![1, 2], vec![]]).unwrap_err();
        assert_eq!(err, FormulaError::EmptyClause { index: 1 });
    }

    #[test]
    fn test_rejects_zero_literal() {
        let err = Formula::new(2, vec![vec![1, 0]]).unwrap_err();
        assert_eq!(err, FormulaError::ZeroLiteral { index: 0 });
    }

    #[test]
    fn test_rejects_out_of_range_variable() {
        let err = Formula::new(2, vec![vec![-3]]).unwrap_err();
        assert!(matches!(
            err,
            FormulaError::VariableOutOfRange { var: 3, .. }
        ));
    }

    #[test]
    fn test_deserialize_applies_the_same_checks() {
        let ok: Formula = serde_json::from_str(r#"{"num_vars":2,"clauses":[[1,-2]]}"#).unwrap();
        assert_eq!(ok, Formula::new(2, vec![vec![1, -2]]).unwrap());

        let err = serde_json::from_str::<Formula>(r#"{"num_vars":1,"clauses":[[2]]}"#).unwrap_err();
        assert!(err.to_string().contains("mentions variable 2"), "{err}");
        assert!(serde_json::from_str::<Formula>(r#"{"num_vars":1,"clauses":[[0]]}"#).is_err());
        assert!(serde_json::from_str::<Formula>(r#"{"num_vars":1,"clauses":[[]]}"#).is_err());
    }

    #[test]
    fn test_witness_fills_missing_variables_with_false() {
        let w = Witness::from_model(&[2, -4, 7], 4);
        assert_eq!(w.value(1), Some(false));
        assert_eq!(w.value(2), Some(true));
        assert_eq!(w.value(4), Some(false));
        assert_eq!(w.value(5), None);
        assert_eq!(w.literals(), vec![-1, 2, -3, -4]);
    }

    #[test]
    fn test_satisfaction_check() {
        let f = Formula::new(3, vec![vec![1, 2], vec![-1, 3], vec![-2]]).unwrap();
        assert!(f.is_satisfied_by(&Witness::from_model(&[1, -2, 3], 3)));
        assert_eq!(f.first_violated(&Witness::from_model(&[1, -2, -3], 3)), Some(1));
        assert_eq!(f.first_violated(&Witness::from_model(&[-1, 2, 3], 3)), Some(2));
    }

    #[test]
    fn test_empty_formula_is_satisfied_by_anything() {
        let f = Formula::new(0, vec![]).unwrap();
        assert!(f.is_empty());
        assert!(f.is_satisfied_by(&Witness::from_model(&[], 0)));
    }
}
