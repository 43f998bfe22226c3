use serde::{Deserialize, Serialize};

use crate::encode::Encoding;

/// Parameters identifying one search instance.
///
/// Field order defines the sort order of persisted records: `(d, t, n, encoding)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProblemKey {
    /// Cover degree: no block may be covered by the union of `d` others.
    pub d: u32,
    /// Size of the ground set (rows of the incidence matrix).
    pub t: u32,
    /// Number of blocks (columns of the incidence matrix).
    pub n: u32,
    /// Which encoder produced the formula for this key.
    #[serde(default)]
    pub encoding: Encoding,
}

impl ProblemKey {
    pub fn new(d: u32, t: u32, n: u32) -> Self {
        Self {
            d,
            t,
            n,
            encoding: Encoding::default(),
        }
    }

    pub fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Number of primary (incidence matrix) variables.
    pub fn primary_vars(&self) -> u32 {
        self.t.saturating_mul(self.n)
    }
}

impl std::fmt::Display for ProblemKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "d={} t={} n={} ({})",
            self.d, self.t, self.n, self.encoding
        )
    }
}
