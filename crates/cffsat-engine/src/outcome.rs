use cffsat_formula::Witness;

/// Result of running one engine, or of a whole race.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The formula is satisfiable; the witness has been checked against it.
    Satisfiable(Witness),
    Unsatisfiable,
    /// The engine stopped without a verdict.
    Unknown,
    /// The race deadline passed first.
    TimedOut,
    /// Memory ran out, either in a worker or on the host.
    ResourceExhausted,
    /// The engine misbehaved: crashed, produced garbage, or returned a bad witness.
    EngineError(String),
}

impl Outcome {
    /// Only satisfiable and unsatisfiable answers settle a race.
    pub fn is_definitive(&self) -> bool {
        matches!(self, Outcome::Satisfiable(_) | Outcome::Unsatisfiable)
    }

    /// Short status label, also used as the persisted solution string.
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Satisfiable(_) => "SAT",
            Outcome::Unsatisfiable => "UNSAT",
            Outcome::Unknown => "UNKNOWN",
            Outcome::TimedOut => "TIMEOUT",
            Outcome::ResourceExhausted => "OUTOFMEMORY",
            Outcome::EngineError(_) => "ERROR",
        }
    }

    pub fn witness(&self) -> Option<&Witness> {
        match self {
            Outcome::Satisfiable(w) => Some(w),
            _ => None,
        }
    }

    pub fn detail(&self) -> Option<&str> {
        match self {
            Outcome::EngineError(detail) => Some(detail),
            _ => None,
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::EngineError(detail) => write!(f, "ERROR ({detail})"),
            other => f.write_str(other.label()),
        }
    }
}
