//! Configuration system for Solstat.
//!
//! Uses `figment` for layered configuration: defaults -> config file -> environment -> overrides.
//! Configuration is loaded from the user config directory (`solstat/config.toml`) and/or
//! `.solstat/config.toml` in the workspace directory.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::estimator::EstimationRatios;
use crate::recommend::RecommendationConfig;
use crate::trend::DEFAULT_THRESHOLD_PCT;

/// Top-level configuration for the Solstat engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SolstatConfig {
    pub endpoint: EndpointConfig,
    pub estimation: EstimationRatios,
    pub fallback: FallbackConfig,
    pub trends: TrendConfig,
    pub recommendations: RecommendationConfig,
}

/// Which dashboard the engine is serving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DashboardRole {
    #[default]
    Administrator,
    Coordinator,
}

impl DashboardRole {
    /// Path segment of this role's statistics endpoints.
    pub fn path_prefix(&self) -> &'static str {
        match self {
            DashboardRole::Administrator => "admin",
            DashboardRole::Coordinator => "coordinador",
        }
    }
}

impl std::fmt::Display for DashboardRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DashboardRole::Administrator => write!(f, "administrator"),
            DashboardRole::Coordinator => write!(f, "coordinator"),
        }
    }
}

/// Backend endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Base URL of the statistics API.
    pub base_url: String,
    /// Dashboard role; selects the endpoint family.
    pub role: DashboardRole,
    /// Restrict program breakdowns to this program.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub program_scope: Option<String>,
    /// HTTP request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/api".to_string(),
            role: DashboardRole::Administrator,
            program_scope: None,
            timeout_secs: 30,
        }
    }
}

/// Fallback orchestration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackConfig {
    /// Per-source timeout in seconds. `None` leaves timeouts to the transport.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_timeout_secs: Option<u64>,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            source_timeout_secs: Some(15),
        }
    }
}

/// Trend classification settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendConfig {
    /// Percent variation beyond which a series is growing or declining.
    pub threshold_pct: f64,
}

impl Default for TrendConfig {
    fn default() -> Self {
        Self {
            threshold_pct: DEFAULT_THRESHOLD_PCT,
        }
    }
}

impl SolstatConfig {
    /// Collect every configuration problem as a human-readable message.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.endpoint.base_url.trim().is_empty() {
            problems.push("endpoint.base_url must not be empty".to_string());
        }
        if self.endpoint.timeout_secs == 0 {
            problems.push("endpoint.timeout_secs must be greater than zero".to_string());
        }
        if self.endpoint.role == DashboardRole::Coordinator
            && self.endpoint.program_scope.is_none()
        {
            problems.push("endpoint.program_scope is required for the coordinator role".to_string());
        }
        if self.fallback.source_timeout_secs == Some(0) {
            problems.push("fallback.source_timeout_secs must be greater than zero".to_string());
        }
        if self.trends.threshold_pct.is_nan() || self.trends.threshold_pct < 0.0 {
            problems.push("trends.threshold_pct must be a non-negative number".to_string());
        }
        problems.extend(self.estimation.validate());
        problems.extend(self.recommendations.validate());
        problems
    }

    /// Fail with every problem joined, or return the config unchanged.
    pub fn validated(self) -> Result<Self, ConfigError> {
        let problems = self.validate();
        if problems.is_empty() {
            Ok(self)
        } else {
            Err(ConfigError::Invalid {
                message: problems.join("; "),
            })
        }
    }
}

fn user_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "solstat", "solstat")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Path of the workspace-level config file.
pub fn workspace_config_path(workspace: &Path) -> PathBuf {
    workspace.join(".solstat").join("config.toml")
}

/// Defaults, then user config, then workspace config.
fn file_layers(workspace: Option<&Path>) -> Figment {
    let mut figment = Figment::from(Serialized::defaults(SolstatConfig::default()));

    if let Some(user_config) = user_config_path().filter(|p| p.exists()) {
        figment = figment.merge(Toml::file(&user_config));
    }

    if let Some(ws) = workspace {
        let ws_config = workspace_config_path(ws);
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }
    figment
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides (passed as argument)
/// 2. Environment variables (prefixed with `SOLSTAT_`)
/// 3. Workspace-local config (`.solstat/config.toml`)
/// 4. User config (`<config dir>/solstat/config.toml`)
/// 5. Built-in defaults
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&SolstatConfig>,
) -> Result<SolstatConfig, Box<figment::Error>> {
    // SOLSTAT_ENDPOINT__BASE_URL, SOLSTAT_TRENDS__THRESHOLD_PCT, ...
    let mut figment = file_layers(workspace).merge(Env::prefixed("SOLSTAT_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment.extract().map_err(Box::new)
}

/// Load configuration with an explicit file layered above the workspace
/// config and below the environment.
pub fn load_config_file(
    file: &Path,
    workspace: Option<&Path>,
) -> Result<SolstatConfig, ConfigError> {
    if !file.exists() {
        return Err(ConfigError::FileNotFound {
            path: file.to_path_buf(),
        });
    }
    let config = file_layers(workspace)
        .merge(Toml::file(file))
        .merge(Env::prefixed("SOLSTAT_").split("__"))
        .extract()?;
    Ok(config)
}

/// Check whether any Solstat configuration file exists.
pub fn config_exists(workspace: Option<&Path>) -> bool {
    if user_config_path().is_some_and(|p| p.exists()) {
        return true;
    }
    workspace.is_some_and(|ws| workspace_config_path(ws).exists())
}

/// Write the default configuration to the workspace config file.
///
/// Refuses to overwrite an existing file. Returns the written path.
pub fn write_default_config(workspace: &Path) -> crate::error::Result<PathBuf> {
    let path = workspace_config_path(workspace);
    if path.exists() {
        return Err(ConfigError::Invalid {
            message: format!("{} already exists", path.display()),
        }
        .into());
    }
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let content = toml::to_string_pretty(&SolstatConfig::default()).map_err(|e| {
        ConfigError::ParseError {
            message: e.to_string(),
        }
    })?;
    std::fs::write(&path, content)?;
    Ok(path)
}
