//! Sweep settings: TOML file first, then CLI overrides.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use cffsat_engine::{Engine, EngineNameError, RaceConfig, SupervisorConfig, WorkerCommand};
use cffsat_formula::Encoding;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error(transparent)]
    Engine(#[from] EngineNameError),

    #[error("engine list is empty")]
    NoEngines,

    #[error("watermarks must satisfy 0 < high ({high}) <= critical ({critical}) <= 100")]
    Watermarks { high: f64, critical: f64 },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("cannot locate worker program: {0}")]
    WorkerProgram(#[source] std::io::Error),
}

/// What a sweep does after a step runs out of memory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExhaustedPolicy {
    #[default]
    Halt,
    Continue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SweepConfig {
    pub cache_path: PathBuf,
    pub timeout_secs: u64,
    /// Engine names, in launch order.
    pub engines: Vec<String>,
    pub preferred_engine: String,
    pub encoding: Encoding,
    pub poll_interval_ms: u64,
    /// Percent of host memory above which no more engines are launched.
    pub high_watermark: f64,
    /// Percent of host memory above which a race degrades, then gives up.
    pub critical_watermark: f64,
    pub on_exhausted: ExhaustedPolicy,
    /// Defaults to this executable's hidden `worker` subcommand.
    pub worker_program: Option<PathBuf>,
    pub worker_memory_limit_mb: Option<u64>,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            cache_path: PathBuf::from("cffdata.json"),
            timeout_secs: 600,
            engines: Engine::ALL.iter().map(|e| e.name().to_string()).collect(),
            preferred_engine: Engine::Varisat.name().to_string(),
            encoding: Encoding::Column,
            poll_interval_ms: 100,
            high_watermark: 90.0,
            critical_watermark: 95.0,
            on_exhausted: ExhaustedPolicy::Halt,
            worker_program: None,
            worker_memory_limit_mb: None,
        }
    }
}

impl SweepConfig {
    /// Load from `path`, or defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn engine_list(&self) -> Result<Vec<Engine>, ConfigError> {
        let engines = Engine::parse_list(&self.engines.join(","))?;
        if engines.is_empty() {
            return Err(ConfigError::NoEngines);
        }
        Ok(engines)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.engine_list()?;
        self.preferred_engine.parse::<Engine>()?;
        let (high, critical) = (self.high_watermark, self.critical_watermark);
        if !(high > 0.0 && high <= critical && critical <= 100.0) {
            return Err(ConfigError::Watermarks { high, critical });
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::Zero("timeout_secs"));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Zero("poll_interval_ms"));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn worker_command(&self) -> Result<WorkerCommand, ConfigError> {
        let command = match &self.worker_program {
            Some(program) => WorkerCommand::new(program),
            None => WorkerCommand::current_exe_subcommand("worker").map_err(ConfigError::WorkerProgram)?,
        };
        Ok(command.with_memory_limit(self.worker_memory_limit_mb.map(|mb| mb * 1024 * 1024)))
    }

    /// Validate and resolve everything a race needs.
    pub fn race_config(&self) -> Result<RaceConfig, ConfigError> {
        self.validate()?;
        Ok(RaceConfig {
            engines: self.engine_list()?,
            timeout: self.timeout(),
            worker: self.worker_command()?,
            supervisor: SupervisorConfig {
                poll_interval: Duration::from_millis(self.poll_interval_ms),
                high_watermark: self.high_watermark,
                critical_watermark: self.critical_watermark,
                preferred_engine: self.preferred_engine.parse()?,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = SweepConfig::default();
        config.validate().unwrap();
        assert_eq!(config.engine_list().unwrap(), Engine::ALL.to_vec());
        assert_eq!(config.timeout(), Duration::from_secs(600));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: SweepConfig = toml::from_str(
            r#"
            timeout_secs = 30
            engines = ["splr", "batsat"]
            on_exhausted = "continue"
            "#,
        )
        .unwrap();
        assert_eq!(config.timeout_secs, 30);
        assert_eq!(config.engine_list().unwrap(), vec![Engine::Splr, Engine::Batsat]);
        assert_eq!(config.on_exhausted, ExhaustedPolicy::Continue);
        assert_eq!(config.cache_path, PathBuf::from("cffdata.json"));
    }

    #[test]
    fn test_unknown_engine_is_fatal() {
        let config = SweepConfig {
            engines: vec!["glucose4".into()],
            ..SweepConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Engine(_))));
    }

    #[test]
    fn test_bad_watermarks_rejected() {
        let config = SweepConfig {
            high_watermark: 96.0,
            critical_watermark: 95.0,
            ..SweepConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Watermarks { .. })));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let config = SweepConfig {
            timeout_secs: 0,
            ..SweepConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Zero("timeout_secs"))));
    }

    #[test]
    fn test_unknown_field_rejected() {
        assert!(toml::from_str::<SweepConfig>("timeout = 5").is_err());
    }

    #[test]
    fn test_memory_limit_converted_to_bytes() {
        let config = SweepConfig {
            worker_program: Some(PathBuf::from("/usr/bin/true")),
            worker_memory_limit_mb: Some(512),
            ..SweepConfig::default()
        };
        let command = config.worker_command().unwrap();
        assert_eq!(command.memory_limit_bytes, Some(512 * 1024 * 1024));
        assert!(command.args.is_empty());
    }
}
