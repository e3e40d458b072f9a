use std::path::{Path, PathBuf};

use gatewright_core::methodology::DEFAULT_METHODOLOGY_GATE;
use serde::Deserialize;

use crate::error::PlannerError;

/// Environment variable that overrides `frameworks.active`.
pub const FRAMEWORK_ENV: &str = "GATEWRIGHT_FRAMEWORK";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GatewrightConfig {
    #[serde(default)]
    pub gates: GatesConfig,
    #[serde(default)]
    pub frameworks: FrameworksConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatesConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub enable_methodology_gates: bool,
    #[serde(default = "default_methodology_gate")]
    pub methodology_default_gate: String,
    /// Lifetime of temporary gates. Zero disables expiry.
    #[serde(default = "default_temporary_gate_ttl_secs")]
    pub temporary_gate_ttl_secs: u64,
    /// IDs of pre-registered gates.
    #[serde(default)]
    pub canonical: Vec<String>,
    /// IDs of gates tied to a reasoning framework.
    #[serde(default)]
    pub methodology: Vec<String>,
    #[serde(default)]
    pub activation: Vec<ActivationRule>,
}

impl Default for GatesConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            enable_methodology_gates: true,
            methodology_default_gate: default_methodology_gate(),
            temporary_gate_ttl_secs: default_temporary_gate_ttl_secs(),
            canonical: Vec::new(),
            methodology: Vec::new(),
            activation: Vec::new(),
        }
    }
}

/// Auto-selects `gate_id` when the prompt category and active framework match.
///
/// An empty `categories` or `frameworks` list matches anything.
#[derive(Debug, Clone, Deserialize)]
pub struct ActivationRule {
    pub gate_id: String,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub frameworks: Vec<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FrameworksConfig {
    #[serde(default)]
    pub enabled: bool,
    pub active: Option<String>,
}

fn default_true() -> bool {
    true
}
fn default_methodology_gate() -> String {
    DEFAULT_METHODOLOGY_GATE.into()
}
fn default_temporary_gate_ttl_secs() -> u64 {
    3600
}

impl GatewrightConfig {
    pub fn from_file(path: &Path) -> Result<Self, PlannerError> {
        let content = std::fs::read_to_string(path).map_err(PlannerError::IoError)?;
        let mut config = Self::from_toml(&content)?;
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, PlannerError> {
        toml::from_str(content)
            .map_err(|e| PlannerError::ConfigError(format!("Failed to parse config: {e}")))
    }

    /// Default config location: ~/.gatewright/config.toml
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".gatewright")
            .join("config.toml")
    }

    /// Load from `path`, falling back to [`default_path`](Self::default_path)
    /// and then to built-in defaults when no file exists.
    pub fn load(path: Option<&Path>) -> Result<Self, PlannerError> {
        if let Some(path) = path {
            return Self::from_file(path);
        }

        let default = Self::default_path();
        if default.exists() {
            return Self::from_file(&default);
        }

        tracing::debug!(path = %default.display(), "No config file, using defaults");
        let mut config = Self::default();
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(framework) = std::env::var(FRAMEWORK_ENV)
            && !framework.trim().is_empty()
        {
            self.frameworks.active = Some(framework.trim().to_string());
        }
    }

    /// Temporary gate lifetime, if expiry is enabled.
    pub fn temporary_gate_ttl(&self) -> Option<chrono::Duration> {
        match self.gates.temporary_gate_ttl_secs {
            0 => None,
            secs => chrono::Duration::try_seconds(i64::try_from(secs).unwrap_or(i64::MAX)),
        }
    }
}
