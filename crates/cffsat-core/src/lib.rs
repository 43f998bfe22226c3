//! Persistence and control for cover-free family sweeps.
//!
//! - **store**: the JSON record file, rewritten atomically
//! - **cache**: memoized race outcomes with a monotonic merge rule
//! - **sweep**: the parameter search driving cache lookups and races
//! - **config**: TOML settings with CLI overrides
//! - **table** / **telemetry**: reporting and log setup for the CLI

pub mod cache;
pub mod config;
pub mod store;
pub mod sweep;
pub mod table;
pub mod telemetry;

pub use cache::{
    CacheError, CacheLookup, CacheRecord, MergeEffect, OutcomeCache, RecordMeta, RecordStatus,
    Solution,
};
pub use config::{ConfigError, ExhaustedPolicy, SweepConfig};
pub use store::{RecordStore, StoreError};
pub use sweep::{
    ProcessRaceLauncher, RaceLauncher, StepReport, StepSource, StopReason, SweepController,
    SweepError, SweepMode, SweepSummary,
};
