//! Configuration for devflow operations.
//!
//! Precedence: CLI overrides > config file > built-in defaults. The file
//! format is TOML with `[agent]`, `[workflow]`, and `[validation]` sections,
//! all optional. `Config` is explicit and threaded through constructors;
//! there are no ambient globals.

use std::collections::HashMap;
use std::fs;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use devflow_utils::error::ConfigError;
use devflow_utils::types::{ModelTier, Phase};

/// Default agent invocation timeout in seconds.
pub const DEFAULT_AGENT_TIMEOUT_SECS: u64 = 600;

/// Default per-unit timeout for parallel phases, in seconds.
pub const DEFAULT_UNIT_TIMEOUT_SECS: u64 = 900;

/// Default cap on retry-resolution attempts per verification phase.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default config file location, relative to the working directory.
pub const CONFIG_FILE: &str = ".devflow/config.toml";

const DEFAULT_STATE_DIR: &str = ".devflow/runs";
const DEFAULT_AGENT_BINARY: &str = "claude";
const DEFAULT_TARGET_BRANCH: &str = "main";

/// How a parallel batch handles partial failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationMode {
    /// Any failed unit fails the batch; zero integration-side mutations.
    AllOrNothing,
    /// Integrate the successes; failures are reported alongside.
    #[default]
    BestEffort,
}

/// `[agent]` section.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct AgentConfig {
    /// Agent binary name, resolved via PATH.
    pub binary: String,
    /// Per-invocation timeout in seconds.
    pub timeout_secs: u64,
    /// Phase-name → tier overrides applied on top of the built-in map.
    pub tiers: HashMap<String, String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            binary: DEFAULT_AGENT_BINARY.to_string(),
            timeout_secs: DEFAULT_AGENT_TIMEOUT_SECS,
            tiers: HashMap::new(),
        }
    }
}

/// `[workflow]` section.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkflowConfig {
    /// Directory holding per-run state records and transcripts.
    pub state_dir: Utf8PathBuf,
    /// Per-unit timeout for parallel phases, in seconds.
    pub unit_timeout_secs: u64,
    /// Cap on retry-resolution attempts per verification phase.
    pub max_attempts: u32,
    /// Partial-failure policy for the parallel batch.
    pub aggregation: AggregationMode,
    /// Branch change requests target.
    pub target_branch: String,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            state_dir: Utf8PathBuf::from(DEFAULT_STATE_DIR),
            unit_timeout_secs: DEFAULT_UNIT_TIMEOUT_SECS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            aggregation: AggregationMode::default(),
            target_branch: DEFAULT_TARGET_BRANCH.to_string(),
        }
    }
}

/// `[validation]` section.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ValidationConfig {
    /// Root prefixes a validated relative path may live under.
    pub allowed_path_roots: Vec<String>,
    /// Short command names that may be delegated.
    pub allowed_commands: Vec<String>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            allowed_path_roots: vec![
                "specs".to_string(),
                "docs".to_string(),
                "src".to_string(),
                "tests".to_string(),
            ],
            allowed_commands: vec!["git".to_string(), "gh".to_string()],
        }
    }
}

/// Root configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub agent: AgentConfig,
    pub workflow: WorkflowConfig,
    pub validation: ValidationConfig,
}

impl Config {
    /// Load configuration from the default location, falling back to
    /// built-in defaults when no file exists.
    pub fn discover() -> Result<Self, ConfigError> {
        let path = Utf8Path::new(CONFIG_FILE);
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load and validate configuration from an explicit TOML file.
    pub fn load(path: &Utf8Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|_| ConfigError::NotFound {
            path: path.to_string(),
        })?;
        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::InvalidFile {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check value-level constraints the TOML grammar cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workflow.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                key: "workflow.max_attempts".to_string(),
                value: "0".to_string(),
            });
        }
        if self.agent.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "agent.timeout_secs".to_string(),
                value: "0".to_string(),
            });
        }
        if self.workflow.unit_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "workflow.unit_timeout_secs".to_string(),
                value: "0".to_string(),
            });
        }
        for (phase, tier) in &self.agent.tiers {
            if phase.parse::<Phase>().is_err() {
                return Err(ConfigError::InvalidValue {
                    key: format!("agent.tiers.{phase}"),
                    value: tier.clone(),
                });
            }
            if tier.parse::<ModelTier>().is_err() {
                return Err(ConfigError::InvalidValue {
                    key: format!("agent.tiers.{phase}"),
                    value: tier.clone(),
                });
            }
        }
        Ok(())
    }

    /// Tier overrides as typed pairs, for the gateway's tier map.
    #[must_use]
    pub fn tier_overrides(&self) -> HashMap<Phase, ModelTier> {
        self.agent
            .tiers
            .iter()
            .filter_map(|(phase, tier)| {
                Some((phase.parse().ok()?, tier.parse().ok()?))
            })
            .collect()
    }

    #[must_use]
    pub fn agent_timeout(&self) -> Duration {
        Duration::from_secs(self.agent.timeout_secs)
    }

    #[must_use]
    pub fn unit_timeout(&self) -> Duration {
        Duration::from_secs(self.workflow.unit_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_config(dir: &TempDir, content: &str) -> Utf8PathBuf {
        let path = Utf8PathBuf::from_path_buf(dir.path().join("config.toml")).unwrap();
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.workflow.max_attempts, 3);
        assert_eq!(config.agent.binary, "claude");
        assert!(config.agent.tiers.is_empty());
    }

    #[test]
    fn loads_partial_file_over_defaults() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"
[workflow]
max_attempts = 5
aggregation = "all_or_nothing"

[agent.tiers]
review = "cheap"
"#,
        );

        let config = Config::load(&path).unwrap();
        assert_eq!(config.workflow.max_attempts, 5);
        assert_eq!(config.workflow.aggregation, AggregationMode::AllOrNothing);
        // Unspecified sections keep defaults.
        assert_eq!(config.agent.timeout_secs, DEFAULT_AGENT_TIMEOUT_SECS);
        assert_eq!(
            config.tier_overrides().get(&Phase::Review),
            Some(&ModelTier::Cheap)
        );
    }

    #[test]
    fn missing_file_is_not_found() {
        let err = Config::load(Utf8Path::new("/nonexistent/config.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound { .. }));
    }

    #[test]
    fn unknown_keys_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "[workflow]\nmax_atempts = 3\n");
        assert!(matches!(
            Config::load(&path).unwrap_err(),
            ConfigError::InvalidFile { .. }
        ));
    }

    #[test]
    fn zero_attempts_rejected() {
        let mut config = Config::default();
        config.workflow.max_attempts = 0;
        assert!(matches!(
            config.validate().unwrap_err(),
            ConfigError::InvalidValue { key, .. } if key == "workflow.max_attempts"
        ));
    }

    #[test]
    fn bogus_tier_override_rejected() {
        let mut config = Config::default();
        config
            .agent
            .tiers
            .insert("review".to_string(), "enormous".to_string());
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config
            .agent
            .tiers
            .insert("deploy".to_string(), "cheap".to_string());
        assert!(config.validate().is_err());
    }
}
