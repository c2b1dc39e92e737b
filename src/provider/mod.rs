//! Provider adapters.
//!
//! Each external coding-agent CLI is wrapped by one type implementing
//! [`ProviderAdapter`]. Adapters are the only code that knows a tool's
//! command line; everything else goes through the trait. Adapters are
//! selected by name from a static registry.

pub mod capacity;
pub mod catalog;
pub mod cc_glm;
pub mod gemini;
pub mod launch;
pub mod model;
pub mod opencode;

pub use capacity::{CapacityMatch, CapacitySignature};
pub use launch::{LaunchRequest, Launched};
pub use model::{ModelPolicy, ModelRequest, Resolution};

use crate::config::RunnerConfig;
use crate::context::RunnerContext;
use crate::error::{RunnerError, Result};
use crate::gates::GateResult;
use crate::process::{self, Termination};
use std::collections::HashMap;
use std::time::Duration;

/// Registered provider names.
pub const PROVIDERS: &[&str] = &["cc-glm", "opencode", "gemini"];

pub fn is_registered(name: &str) -> bool {
    PROVIDERS.contains(&name)
}

/// Contract every provider adapter fulfils.
pub trait ProviderAdapter {
    /// Registry name; also the state subdirectory.
    fn name(&self) -> &'static str;

    /// Executable plus any fixed leading arguments.
    fn binary(&self) -> &[String];

    fn model_policy(&self) -> ModelPolicy;

    /// The provider's model catalogue.
    fn list_models(&self) -> Result<Vec<String>>;

    /// Full argv for a run, including the binary.
    fn launch_command(&self, request: &LaunchRequest<'_>) -> Vec<String>;

    /// Extra environment for the provider process.
    fn environment(&self) -> &HashMap<String, String>;

    /// Check that the provider can be launched at all.
    fn preflight(&self) -> GateResult {
        let program = self.binary().first().map(String::as_str).unwrap_or_default();
        match process::find_executable(program) {
            Some(path) => GateResult::pass(
                "preflight",
                "preflight_ok",
                format!("{} found at {}", program, path.display()),
            )
            .with_identifier("provider", self.name()),
            None => GateResult::fail(
                "preflight",
                "preflight_binary_missing",
                format!("{} executable '{}' not found in PATH", self.name(), program),
            )
            .with_identifier("provider", self.name()),
        }
    }

    fn resolve_model(&self, request: &ModelRequest) -> Resolution {
        model::resolve(&self.model_policy(), request, self.list_models())
    }

    /// Whether `model` resolves exactly, with no fallback.
    fn probe_model(&self, model: &str) -> bool {
        matches!(
            self.resolve_model(&ModelRequest::explicit(Some(model.to_string()))),
            Resolution::Resolved { .. }
        )
    }

    /// Launch detached; the exit code lands in `request.rc_file`.
    fn start(&self, request: &LaunchRequest<'_>) -> Result<Launched> {
        let argv = self.launch_command(request);
        launch::spawn_with_rc(&argv, request, self.environment())
    }

    /// Terminate the job's process group, escalating after `grace`.
    fn stop(&self, pid: u32, grace: Duration) -> Result<Termination> {
        process::terminate_group(pid, grace)
    }

    fn capacity_signatures(&self) -> &'static [CapacitySignature] {
        capacity::DEFAULT_SIGNATURES
    }
}

/// Instantiate the adapter registered under `name`.
pub fn adapter_for(
    name: &str,
    ctx: &RunnerContext,
    config: &RunnerConfig,
) -> Result<Box<dyn ProviderAdapter>> {
    let settings = config.provider(name);
    match name {
        "cc-glm" => Ok(Box::new(cc_glm::CcGlm::new(&settings)?)),
        "opencode" => Ok(Box::new(opencode::OpenCode::new(ctx, config, &settings)?)),
        "gemini" => Ok(Box::new(gemini::Gemini::new(&settings)?)),
        other => Err(RunnerError::UserError(format!(
            "unknown provider '{}' (known: {})",
            other,
            PROVIDERS.join(", ")
        ))),
    }
}

/// Executable argv from provider settings, or the default executable name.
pub(crate) fn binary_argv(configured: Option<&str>, default: &str) -> Result<Vec<String>> {
    match configured {
        Some(binary) => launch::split_binary(binary),
        None => Ok(vec![default.to_string()]),
    }
}

/// Static catalogue: configured models, or the built-in list.
pub(crate) fn static_catalogue(configured: &[String], builtin: &[&str]) -> Vec<String> {
    if configured.is_empty() {
        builtin.iter().map(|m| m.to_string()).collect()
    } else {
        configured.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderSettings;
    use crate::test_support::write_script;
    use tempfile::TempDir;

    #[test]
    fn test_registry_covers_every_provider() {
        let temp_dir = TempDir::new().unwrap();
        let ctx = RunnerContext::new(temp_dir.path());
        let config = RunnerConfig::default();

        for name in PROVIDERS {
            let adapter = adapter_for(name, &ctx, &config).unwrap();
            assert_eq!(adapter.name(), *name);
            assert!(!adapter.model_policy().default_model.is_empty());
        }
        assert!(adapter_for("claude", &ctx, &config).is_err());
        assert!(!is_registered("claude"));
    }

    #[test]
    fn test_preflight_reports_missing_binary() {
        let temp_dir = TempDir::new().unwrap();
        let ctx = RunnerContext::new(temp_dir.path());
        let mut config = RunnerConfig::default();
        config.providers.insert(
            "gemini".to_string(),
            ProviderSettings {
                binary: Some("/nonexistent/gemini".to_string()),
                ..ProviderSettings::default()
            },
        );

        let adapter = adapter_for("gemini", &ctx, &config).unwrap();
        let result = adapter.preflight();
        assert!(!result.passed);
        assert_eq!(result.reason_code, "preflight_binary_missing");
    }

    #[test]
    fn test_preflight_passes_for_executable() {
        let temp_dir = TempDir::new().unwrap();
        let script = temp_dir.path().join("cc-glm");
        write_script(&script, "exit 0");
        let ctx = RunnerContext::new(temp_dir.path().join("state"));
        let mut config = RunnerConfig::default();
        config.providers.insert(
            "cc-glm".to_string(),
            ProviderSettings {
                binary: Some(script.display().to_string()),
                ..ProviderSettings::default()
            },
        );

        let adapter = adapter_for("cc-glm", &ctx, &config).unwrap();
        assert!(adapter.preflight().passed);
        assert!(adapter.probe_model("glm-5"));
        assert!(!adapter.probe_model("glm-9"));
    }

    #[test]
    fn test_static_catalogue_prefers_configured() {
        assert_eq!(static_catalogue(&[], &["a", "b"]), vec!["a", "b"]);
        assert_eq!(static_catalogue(&["c".to_string()], &["a"]), vec!["c"]);
    }
}
