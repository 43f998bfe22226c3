//! Engine allow-list, process-isolated engine runners, and the multi-engine race.
//!
//! - **engine / solve**: the fixed set of SAT engines and their in-process adapters
//! - **protocol / worker**: the JSON exchange between the race and a worker process
//! - **runner**: spawning one worker and turning whatever it leaves behind into an [`Outcome`]
//! - **race**: first-definitive-wins racing with degradation and cancellation
//! - **supervisor**: deadline and memory-pressure enforcement for a running race

pub mod engine;
pub mod outcome;
pub mod protocol;
pub mod race;
pub mod runner;
pub mod solve;
pub mod supervisor;
pub mod worker;

pub use engine::{Engine, EngineNameError};
pub use outcome::Outcome;
pub use race::{CancelFlag, Race, RaceConfig, RaceError, RaceHandle, RaceReport, RaceStatus};
pub use runner::{EngineRunner, WorkerCommand};
pub use solve::Verdict;
pub use supervisor::{MemoryProbe, ResourceSupervisor, ScriptedProbe, SupervisorConfig, SystemMemory};
