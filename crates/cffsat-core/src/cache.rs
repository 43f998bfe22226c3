//! Memoized race outcomes, keyed by problem parameters.
//!
//! Merging is monotonic:
//!
//! - a definitive record (blocks or `UNSAT`) is never changed afterwards, and a
//!   conflicting definitive answer is an error;
//! - a definitive outcome replaces any non-definitive record;
//! - a non-definitive outcome replaces a non-definitive record only when it
//!   ran for strictly longer.

use std::collections::BTreeMap;
use std::path::PathBuf;

use cffsat_engine::Outcome;
use cffsat_formula::{blocks_from_witness, Blocks, Encoding, ProblemKey};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::store::{RecordStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("conflicting results for {key}: cached {cached}, new {incoming}")]
    Conflict {
        key: ProblemKey,
        cached: &'static str,
        incoming: &'static str,
    },
}

/// Persisted status of a record without a witness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordStatus {
    #[serde(rename = "UNSAT")]
    Unsat,
    #[serde(rename = "TIMEOUT")]
    TimedOut,
    #[serde(rename = "OUTOFMEMORY")]
    OutOfMemory,
    #[serde(rename = "UNKNOWN")]
    Unknown,
    #[serde(rename = "ERROR")]
    Error,
}

/// The `solution` field: a status string or the block family found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Solution {
    Status(RecordStatus),
    Blocks(Blocks),
}

impl Solution {
    pub fn label(&self) -> &'static str {
        match self {
            Solution::Blocks(_) => "SAT",
            Solution::Status(RecordStatus::Unsat) => "UNSAT",
            Solution::Status(RecordStatus::TimedOut) => "TIMEOUT",
            Solution::Status(RecordStatus::OutOfMemory) => "OUTOFMEMORY",
            Solution::Status(RecordStatus::Unknown) => "UNKNOWN",
            Solution::Status(RecordStatus::Error) => "ERROR",
        }
    }

    pub fn is_definitive(&self) -> bool {
        matches!(
            self,
            Solution::Blocks(_) | Solution::Status(RecordStatus::Unsat)
        )
    }

    pub fn is_satisfiable(&self) -> bool {
        matches!(self, Solution::Blocks(_))
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, Solution::Status(RecordStatus::OutOfMemory))
    }

    /// The persisted form of an outcome for `key`.
    pub fn from_outcome(key: &ProblemKey, outcome: &Outcome) -> Self {
        match outcome {
            Outcome::Satisfiable(witness) => {
                Solution::Blocks(blocks_from_witness(witness, key.t, key.n))
            }
            Outcome::Unsatisfiable => Solution::Status(RecordStatus::Unsat),
            Outcome::Unknown => Solution::Status(RecordStatus::Unknown),
            Outcome::TimedOut => Solution::Status(RecordStatus::TimedOut),
            Outcome::ResourceExhausted => Solution::Status(RecordStatus::OutOfMemory),
            Outcome::EngineError(_) => Solution::Status(RecordStatus::Error),
        }
    }
}

/// One persisted record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheRecord {
    pub d: u32,
    pub t: u32,
    pub n: u32,
    #[serde(default)]
    pub encoding: Encoding,
    /// Clause count of the formula that was raced.
    pub clauses: u64,
    /// Elapsed seconds. For timeouts, the configured budget.
    pub time: f64,
    pub solution: Solution,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl CacheRecord {
    pub fn key(&self) -> ProblemKey {
        ProblemKey::new(self.d, self.t, self.n).with_encoding(self.encoding)
    }
}

/// Size and cost of the race behind an outcome.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecordMeta {
    pub clauses: u64,
    pub elapsed_secs: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    Miss,
    /// A non-definitive record that ran with a smaller budget than the current one.
    Stale(CacheRecord),
    Hit(CacheRecord),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeEffect {
    Inserted,
    Replaced,
    Kept,
}

pub struct OutcomeCache {
    store: RecordStore,
    records: BTreeMap<ProblemKey, CacheRecord>,
}

impl OutcomeCache {
    /// Load the store at `path`. Corruption is an error; nothing is discarded.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let store = RecordStore::new(path);
        let records = index(store.load()?);
        info!(path = %store.path().display(), records = records.len(), "outcome cache loaded");
        Ok(Self { store, records })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> impl Iterator<Item = &CacheRecord> {
        self.records.values()
    }

    pub fn lookup(&self, key: &ProblemKey) -> Option<CacheRecord> {
        self.records.get(key).cloned()
    }

    /// Decide whether a cached record answers `key` under the current budget.
    ///
    /// Non-definitive records that ran for less than `timeout_secs` are stale.
    pub fn classify(&self, key: &ProblemKey, timeout_secs: f64) -> CacheLookup {
        match self.lookup(key) {
            None => CacheLookup::Miss,
            Some(record) if !record.solution.is_definitive() && record.time < timeout_secs => {
                CacheLookup::Stale(record)
            }
            Some(record) => CacheLookup::Hit(record),
        }
    }

    /// Merge an outcome for `key` and persist it if anything changed.
    ///
    /// The store is re-read first so the rule applies to what is on disk.
    pub fn merge(
        &mut self,
        key: ProblemKey,
        outcome: &Outcome,
        meta: RecordMeta,
    ) -> Result<MergeEffect, CacheError> {
        self.records = index(self.store.load()?);

        let incoming = CacheRecord {
            d: key.d,
            t: key.t,
            n: key.n,
            encoding: key.encoding,
            clauses: meta.clauses,
            time: meta.elapsed_secs,
            solution: Solution::from_outcome(&key, outcome),
            detail: outcome.detail().map(str::to_string),
        };

        let effect = match self.records.get(&key) {
            None => MergeEffect::Inserted,
            Some(cached) => decide(&key, cached, &incoming)?,
        };
        if effect == MergeEffect::Kept {
            debug!(%key, outcome = outcome.label(), "cached record kept");
            return Ok(effect);
        }

        info!(%key, solution = incoming.solution.label(), ?effect, "recording outcome");
        self.records.insert(key, incoming);
        let all: Vec<CacheRecord> = self.records.values().cloned().collect();
        self.store.save(&all)?;
        Ok(effect)
    }

    /// Largest satisfiable `n` for each `t`, for one degree and encoding.
    pub fn best_per_t(&self, d: u32, encoding: Encoding) -> BTreeMap<u32, CacheRecord> {
        let mut best: BTreeMap<u32, CacheRecord> = BTreeMap::new();
        for record in self.records.values() {
            if record.d != d || record.encoding != encoding || !record.solution.is_satisfiable() {
                continue;
            }
            match best.get(&record.t) {
                Some(current) if current.n >= record.n => {}
                _ => {
                    best.insert(record.t, record.clone());
                }
            }
        }
        best
    }
}

fn index(records: Vec<CacheRecord>) -> BTreeMap<ProblemKey, CacheRecord> {
    let mut map = BTreeMap::new();
    for record in records {
        let key = record.key();
        if map.contains_key(&key) {
            warn!(%key, "duplicate record in store, keeping the first");
            continue;
        }
        map.insert(key, record);
    }
    map
}

fn decide(
    key: &ProblemKey,
    cached: &CacheRecord,
    incoming: &CacheRecord,
) -> Result<MergeEffect, CacheError> {
    let old = &cached.solution;
    let new = &incoming.solution;
    match (old.is_definitive(), new.is_definitive()) {
        (true, true) if old.is_satisfiable() == new.is_satisfiable() => Ok(MergeEffect::Kept),
        (true, true) => Err(CacheError::Conflict {
            key: *key,
            cached: old.label(),
            incoming: new.label(),
        }),
        (true, false) => Ok(MergeEffect::Kept),
        (false, true) => Ok(MergeEffect::Replaced),
        (false, false) if incoming.time > cached.time => Ok(MergeEffect::Replaced),
        (false, false) => Ok(MergeEffect::Kept),
    }
}
