//! Configuration model for dx-runner.
//!
//! This module defines the `RunnerConfig` struct that represents `config.yaml`.
//! It supports forward-compatible YAML parsing (unknown fields are ignored),
//! sensible defaults for optional fields, and validation of config values.
//!
//! Configuration is passed explicitly into every command. Nothing here reads
//! ambient environment variables; the one ambient input (a model override) is
//! captured by the CLI layer and only honoured behind an explicit allow flag.

use crate::error::{RunnerError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// How strictly adapter preflight failures block a start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PreflightMode {
    /// Preflight failure blocks the start (default).
    #[default]
    Strict,
    /// Preflight failure is logged and the start proceeds.
    Lenient,
    /// Preflight is not run.
    Skip,
}

impl PreflightMode {
    /// Parse a preflight mode from a string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "strict" => Some(Self::Strict),
            "lenient" => Some(Self::Lenient),
            "skip" => Some(Self::Skip),
            _ => None,
        }
    }
}

/// Gates a profile can require at `start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequiredGate {
    /// Issue-tracker reachability.
    Beads,
    /// Worktree HEAD must contain the required baseline SHA.
    Baseline,
    /// Deployment CLI session plus service URL context.
    Auth,
    /// Exit 0 without a new commit is recorded as `failed`.
    CommitRequired,
}

impl std::fmt::Display for RequiredGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequiredGate::Beads => write!(f, "beads"),
            RequiredGate::Baseline => write!(f, "baseline"),
            RequiredGate::Auth => write!(f, "auth"),
            RequiredGate::CommitRequired => write!(f, "commit-required"),
        }
    }
}

impl RequiredGate {
    /// Parse a gate name as written on the command line.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "beads" => Some(Self::Beads),
            "baseline" => Some(Self::Baseline),
            "auth" => Some(Self::Auth),
            "commit-required" | "commit_required" => Some(Self::CommitRequired),
            _ => None,
        }
    }
}

/// A named dispatch bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    /// Provider name (must be registered).
    pub provider: String,

    /// Requested model (resolved through the provider's policy).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Preflight strictness.
    #[serde(default)]
    pub preflight: PreflightMode,

    /// Gates that must run (and pass) at start.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub gates: Vec<RequiredGate>,

    /// Free-form description shown by `profiles`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

/// Per-provider settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    /// Executable to invoke (defaults to the provider's own CLI name).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub binary: Option<String>,

    /// Maximum live jobs for this provider (overrides the global default).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_concurrent: Option<u32>,

    /// Static model catalogue for providers without a listing command.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub models: Vec<String>,

    /// Require the auth/service-context preflight before every start.
    pub auth_preflight: bool,

    /// Extra environment variables for the provider process.
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub environment: HashMap<String, String>,
}

/// Configuration for dx-runner.
///
/// This struct represents the contents of `config.yaml`.
/// Unknown fields in the YAML are ignored for forward compatibility.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    // =========================================================================
    // Health thresholds
    // =========================================================================
    /// Seconds after start during which a silent job is `launching`.
    #[serde(default = "default_launch_grace_secs")]
    pub launch_grace_secs: u64,

    /// Seconds without progress evidence before a live job is `stalled`.
    #[serde(default = "default_stall_after_secs")]
    pub stall_after_secs: u64,

    // =========================================================================
    // Monitor settings
    // =========================================================================
    /// Seconds between heartbeat writes.
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,

    /// Milliseconds between Monitor polls of the rc file and pid.
    #[serde(default = "default_monitor_poll_ms")]
    pub monitor_poll_ms: u64,

    /// Milliseconds to wait for the rc file after the pid disappears.
    #[serde(default = "default_rc_grace_ms")]
    pub rc_grace_ms: u64,

    /// Seconds between SIGTERM and SIGKILL on `stop`.
    #[serde(default = "default_stop_grace_secs")]
    pub stop_grace_secs: u64,

    // =========================================================================
    // Catalogue and pruning
    // =========================================================================
    /// Seconds a cached model catalogue stays fresh.
    #[serde(default = "default_catalog_ttl_secs")]
    pub catalog_ttl_secs: u64,

    /// Hours after completion before `prune` removes a terminal job.
    #[serde(default = "default_prune_after_hours")]
    pub prune_after_hours: u64,

    // =========================================================================
    // External collaborators
    // =========================================================================
    /// Path to the external issue-tracker repository.
    #[serde(default = "default_beads_repo")]
    pub beads_repo: PathBuf,

    /// Issue-tracker CLI executable.
    #[serde(default = "default_beads_cli")]
    pub beads_cli: String,

    /// Deployment CLI consulted by the auth preflight.
    #[serde(default = "default_auth_cli")]
    pub auth_cli: String,

    /// Arguments that make the deployment CLI report its session.
    #[serde(default = "default_auth_check_args")]
    pub auth_check_args: Vec<String>,

    /// Environment variable holding the runtime service URL.
    #[serde(default = "default_service_url_env")]
    pub service_url_env: String,

    // =========================================================================
    // Providers and profiles
    // =========================================================================
    /// Live-job cap for providers without their own `max_concurrent`.
    #[serde(default = "default_max_concurrent")]
    pub default_max_concurrent: u32,

    /// Provider settings keyed by provider name.
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderSettings>,

    /// Named dispatch profiles.
    #[serde(default = "default_profiles")]
    pub profiles: BTreeMap<String, Profile>,
}

// Default value functions for serde

fn default_launch_grace_secs() -> u64 {
    60
}

fn default_stall_after_secs() -> u64 {
    600
}

fn default_heartbeat_interval_secs() -> u64 {
    5
}

fn default_monitor_poll_ms() -> u64 {
    500
}

fn default_rc_grace_ms() -> u64 {
    2000
}

fn default_stop_grace_secs() -> u64 {
    10
}

fn default_catalog_ttl_secs() -> u64 {
    300
}

fn default_prune_after_hours() -> u64 {
    24
}

fn default_beads_repo() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/"))
        .join("bd")
}

fn default_beads_cli() -> String {
    "bd".to_string()
}

fn default_auth_cli() -> String {
    "railway".to_string()
}

fn default_auth_check_args() -> Vec<String> {
    vec!["whoami".to_string()]
}

fn default_service_url_env() -> String {
    "RAILWAY_SERVICE_URL".to_string()
}

fn default_max_concurrent() -> u32 {
    4
}

/// Built-in profiles available without any config file.
pub fn default_profiles() -> BTreeMap<String, Profile> {
    let mut profiles = BTreeMap::new();
    profiles.insert(
        "opencode-strict".to_string(),
        Profile {
            provider: "opencode".to_string(),
            model: Some("zhipuai-coding-plan/glm-5".to_string()),
            preflight: PreflightMode::Strict,
            gates: vec![RequiredGate::Beads, RequiredGate::CommitRequired],
            description: "Canonical GLM-5 through opencode; a commit is mandatory".to_string(),
        },
    );
    profiles.insert(
        "cc-glm-default".to_string(),
        Profile {
            provider: "cc-glm".to_string(),
            model: Some("glm-5".to_string()),
            preflight: PreflightMode::Strict,
            gates: Vec::new(),
            description: "cc-glm with model fallback enabled".to_string(),
        },
    );
    profiles.insert(
        "gemini-lenient".to_string(),
        Profile {
            provider: "gemini".to_string(),
            model: None,
            preflight: PreflightMode::Lenient,
            gates: Vec::new(),
            description: "Gemini with non-blocking preflight".to_string(),
        },
    );
    profiles
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            launch_grace_secs: default_launch_grace_secs(),
            stall_after_secs: default_stall_after_secs(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            monitor_poll_ms: default_monitor_poll_ms(),
            rc_grace_ms: default_rc_grace_ms(),
            stop_grace_secs: default_stop_grace_secs(),
            catalog_ttl_secs: default_catalog_ttl_secs(),
            prune_after_hours: default_prune_after_hours(),
            beads_repo: default_beads_repo(),
            beads_cli: default_beads_cli(),
            auth_cli: default_auth_cli(),
            auth_check_args: default_auth_check_args(),
            service_url_env: default_service_url_env(),
            default_max_concurrent: default_max_concurrent(),
            providers: BTreeMap::new(),
            profiles: default_profiles(),
        }
    }
}

impl RunnerConfig {
    /// Load config from a YAML file.
    ///
    /// # Returns
    ///
    /// * `Ok(RunnerConfig)` - Successfully loaded and validated config
    /// * `Err(RunnerError::UserError)` - Read error, parse error, or validation failure
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            RunnerError::UserError(format!(
                "failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;

        Self::from_yaml(&content)
    }

    /// Load an explicit config path, or `fallback` when it exists, or defaults.
    ///
    /// An explicit path that cannot be read is an error; a missing fallback is not.
    pub fn load_or_default(explicit: Option<&Path>, fallback: &Path) -> Result<Self> {
        match explicit {
            Some(path) => Self::load(path),
            None if fallback.exists() => Self::load(fallback),
            None => Ok(Self::default()),
        }
    }

    /// Parse config from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: RunnerConfig = if yaml.trim().is_empty() {
            RunnerConfig::default()
        } else {
            serde_yaml::from_str(yaml).map_err(|e| {
                RunnerError::UserError(format!("failed to parse config YAML: {}", e))
            })?
        };

        config.validate()?;
        Ok(config)
    }

    /// Serialize config to YAML string.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| {
            RunnerError::UserError(format!("failed to serialize config to YAML: {}", e))
        })
    }

    /// Validate config values and return error on invalid values.
    ///
    /// Validation rules:
    /// - `stall_after_secs` must be greater than `launch_grace_secs`
    /// - poll and heartbeat intervals must be positive
    /// - caps must be positive
    /// - every profile must name a registered provider
    pub fn validate(&self) -> Result<()> {
        if self.stall_after_secs <= self.launch_grace_secs {
            return Err(RunnerError::UserError(format!(
                "config validation failed: stall_after_secs ({}) must be greater than launch_grace_secs ({})",
                self.stall_after_secs, self.launch_grace_secs
            )));
        }

        if self.monitor_poll_ms == 0 || self.heartbeat_interval_secs == 0 {
            return Err(RunnerError::UserError(
                "config validation failed: monitor_poll_ms and heartbeat_interval_secs must be greater than 0"
                    .to_string(),
            ));
        }

        if self.default_max_concurrent == 0 {
            return Err(RunnerError::UserError(
                "config validation failed: default_max_concurrent must be greater than 0"
                    .to_string(),
            ));
        }

        for (name, settings) in &self.providers {
            if !crate::provider::is_registered(name) {
                return Err(RunnerError::UserError(format!(
                    "config validation failed: unknown provider '{}' (known: {})",
                    name,
                    crate::provider::PROVIDERS.join(", ")
                )));
            }
            if settings.max_concurrent == Some(0) {
                return Err(RunnerError::UserError(format!(
                    "config validation failed: providers.{}.max_concurrent must be greater than 0",
                    name
                )));
            }
        }

        for (name, profile) in &self.profiles {
            if !crate::provider::is_registered(&profile.provider) {
                return Err(RunnerError::UserError(format!(
                    "config validation failed: profile '{}' references unknown provider '{}'",
                    name, profile.provider
                )));
            }
        }

        Ok(())
    }

    /// Settings for a provider (defaults when unconfigured).
    pub fn provider(&self, name: &str) -> ProviderSettings {
        self.providers.get(name).cloned().unwrap_or_default()
    }

    /// Effective live-job cap for a provider.
    pub fn max_concurrent(&self, provider: &str) -> u32 {
        self.providers
            .get(provider)
            .and_then(|s| s.max_concurrent)
            .unwrap_or(self.default_max_concurrent)
    }

    /// Look up a profile by name.
    pub fn profile(&self, name: &str) -> Result<&Profile> {
        self.profiles.get(name).ok_or_else(|| {
            let known: Vec<&str> = self.profiles.keys().map(String::as_str).collect();
            RunnerError::UserError(format!(
                "unknown profile '{}' (known: {})",
                name,
                if known.is_empty() {
                    "none".to_string()
                } else {
                    known.join(", ")
                }
            ))
        })
    }

    pub fn launch_grace(&self) -> Duration {
        Duration::from_secs(self.launch_grace_secs)
    }

    pub fn stall_after(&self) -> Duration {
        Duration::from_secs(self.stall_after_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn monitor_poll(&self) -> Duration {
        Duration::from_millis(self.monitor_poll_ms)
    }

    pub fn rc_grace(&self) -> Duration {
        Duration::from_millis(self.rc_grace_ms)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }

    pub fn catalog_ttl(&self) -> Duration {
        Duration::from_secs(self.catalog_ttl_secs)
    }
}
