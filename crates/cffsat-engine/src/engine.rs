//! The fixed allow-list of SAT engines a race may launch.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A SAT engine compiled into the worker binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    Varisat,
    Splr,
    Batsat,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown engine '{0}' (expected one of: varisat, splr, batsat)")]
pub struct EngineNameError(pub String);

impl Engine {
    /// Every engine, in launch order.
    pub const ALL: [Engine; 3] = [Engine::Varisat, Engine::Splr, Engine::Batsat];

    pub fn name(&self) -> &'static str {
        match self {
            Engine::Varisat => "varisat",
            Engine::Splr => "splr",
            Engine::Batsat => "batsat",
        }
    }

    /// Parse a comma-separated engine list. `all` expands to [`Engine::ALL`].
    ///
    /// Duplicates are dropped, first occurrence wins.
    pub fn parse_list(list: &str) -> Result<Vec<Engine>, EngineNameError> {
        let mut engines = Vec::new();
        for part in list.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            if part.eq_ignore_ascii_case("all") {
                for engine in Engine::ALL {
                    if !engines.contains(&engine) {
                        engines.push(engine);
                    }
                }
                continue;
            }
            let engine: Engine = part.parse()?;
            if !engines.contains(&engine) {
                engines.push(engine);
            }
        }
        Ok(engines)
    }
}

impl std::fmt::Display for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Engine {
    type Err = EngineNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Engine::ALL
            .into_iter()
            .find(|e| e.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| EngineNameError(s.to_string()))
    }
}
