//! opencode adapter.
//!
//! The catalogue comes from `opencode models`, cached with a TTL. Only the
//! `zhipuai-coding-plan/` namespace is accepted and there is no fallback:
//! a request outside the catalogue is `unavailable`.

use super::catalog::CatalogCache;
use super::{LaunchRequest, ModelPolicy, ProviderAdapter, binary_argv};
use crate::config::{ProviderSettings, RunnerConfig};
use crate::context::RunnerContext;
use crate::error::{RunnerError, Result};
use std::collections::HashMap;
use std::process::{Command, Stdio};

pub const CANONICAL_PREFIX: &str = "zhipuai-coding-plan/";
pub const DEFAULT_MODEL: &str = "zhipuai-coding-plan/glm-5";

pub struct OpenCode {
    binary: Vec<String>,
    cache: CatalogCache,
    environment: HashMap<String, String>,
}

impl OpenCode {
    pub fn new(
        ctx: &RunnerContext,
        config: &RunnerConfig,
        settings: &ProviderSettings,
    ) -> Result<Self> {
        Ok(Self {
            binary: binary_argv(settings.binary.as_deref(), "opencode")?,
            cache: CatalogCache::new(
                ctx.catalog_cache_path("opencode"),
                ctx.catalog_lock_path("opencode"),
                config.catalog_ttl(),
            ),
            environment: settings.environment.clone(),
        })
    }

    /// Run `<binary> models` and collect one id per non-empty line.
    fn fetch_models(&self) -> Result<Vec<String>> {
        let (program, args) = self
            .binary
            .split_first()
            .ok_or_else(|| RunnerError::UserError("opencode binary is empty".to_string()))?;

        let output = Command::new(program)
            .args(args)
            .arg("models")
            .envs(&self.environment)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| {
                RunnerError::UserError(format!("failed to execute '{} models': {}", program, e))
            })?;

        if !output.status.success() {
            return Err(RunnerError::UserError(format!(
                "'{} models' failed (exit code {}): {}",
                program,
                output.status.code().unwrap_or(-1),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.contains(char::is_whitespace))
            .map(str::to_string)
            .collect())
    }
}

impl ProviderAdapter for OpenCode {
    fn name(&self) -> &'static str {
        "opencode"
    }

    fn binary(&self) -> &[String] {
        &self.binary
    }

    fn model_policy(&self) -> ModelPolicy {
        ModelPolicy {
            default_model: DEFAULT_MODEL,
            canonical_prefix: Some(CANONICAL_PREFIX),
            allow_fallback: false,
        }
    }

    fn list_models(&self) -> Result<Vec<String>> {
        self.cache.get_or_refresh(|| self.fetch_models())
    }

    fn launch_command(&self, request: &LaunchRequest<'_>) -> Vec<String> {
        let mut argv = self.binary.clone();
        argv.extend(["run", "--model", request.model].map(str::to_string));
        argv
    }

    fn environment(&self) -> &HashMap<String, String> {
        &self.environment
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ModelRequest, Resolution};
    use crate::test_support::write_script;
    use tempfile::TempDir;

    fn adapter_with_script(temp_dir: &TempDir, body: &str) -> OpenCode {
        let script = temp_dir.path().join("opencode");
        write_script(&script, body);
        let ctx = RunnerContext::new(temp_dir.path().join("state"));
        let settings = ProviderSettings {
            binary: Some(script.display().to_string()),
            ..ProviderSettings::default()
        };
        OpenCode::new(&ctx, &RunnerConfig::default(), &settings).unwrap()
    }

    #[test]
    fn test_catalogue_comes_from_models_subcommand_and_is_cached() {
        let temp_dir = TempDir::new().unwrap();
        let counter = temp_dir.path().join("calls");
        let body = format!(
            "[ \"$1\" = models ] || exit 2\necho x >> '{}'\necho zhipuai-coding-plan/glm-5\necho zai-coding-plan/glm-5",
            counter.display()
        );
        let adapter = adapter_with_script(&temp_dir, &body);

        let models = adapter.list_models().unwrap();
        assert_eq!(models, vec!["zhipuai-coding-plan/glm-5", "zai-coding-plan/glm-5"]);
        adapter.list_models().unwrap();

        let calls = std::fs::read_to_string(&counter).unwrap();
        assert_eq!(calls.lines().count(), 1);
    }

    #[test]
    fn test_non_canonical_namespace_is_unavailable() {
        let temp_dir = TempDir::new().unwrap();
        let adapter = adapter_with_script(
            &temp_dir,
            "echo zhipuai-coding-plan/glm-5\necho zai-coding-plan/glm-5",
        );
        let resolution = adapter
            .resolve_model(&ModelRequest::explicit(Some("zai-coding-plan/glm-5".to_string())));
        assert_eq!(
            resolution,
            Resolution::Unavailable {
                reason: "non_canonical_model:zai-coding-plan/glm-5".to_string()
            }
        );
    }

    #[test]
    fn test_failing_catalogue_is_unavailable_without_fallback() {
        let temp_dir = TempDir::new().unwrap();
        let adapter = adapter_with_script(&temp_dir, "echo broken >&2\nexit 1");
        let resolution = adapter.resolve_model(&ModelRequest::default());
        assert!(matches!(resolution, Resolution::Unavailable { .. }));
        assert!(!adapter.probe_model(DEFAULT_MODEL));
    }
}
