//! cc-glm adapter: a headless agent CLI backed by GLM models.
//!
//! Static catalogue; rejected requests fall back to the default model with
//! an auditable reason.

use super::{LaunchRequest, ModelPolicy, ProviderAdapter, binary_argv, static_catalogue};
use crate::config::ProviderSettings;
use crate::error::Result;
use std::collections::HashMap;

const BUILTIN_MODELS: &[&str] = &["glm-5", "glm-4.7"];

pub struct CcGlm {
    binary: Vec<String>,
    models: Vec<String>,
    environment: HashMap<String, String>,
}

impl CcGlm {
    pub fn new(settings: &ProviderSettings) -> Result<Self> {
        Ok(Self {
            binary: binary_argv(settings.binary.as_deref(), "cc-glm")?,
            models: static_catalogue(&settings.models, BUILTIN_MODELS),
            environment: settings.environment.clone(),
        })
    }
}

impl ProviderAdapter for CcGlm {
    fn name(&self) -> &'static str {
        "cc-glm"
    }

    fn binary(&self) -> &[String] {
        &self.binary
    }

    fn model_policy(&self) -> ModelPolicy {
        ModelPolicy {
            default_model: "glm-5",
            canonical_prefix: None,
            allow_fallback: true,
        }
    }

    fn list_models(&self) -> Result<Vec<String>> {
        Ok(self.models.clone())
    }

    fn launch_command(&self, request: &LaunchRequest<'_>) -> Vec<String> {
        let mut argv = self.binary.clone();
        argv.extend(
            [
                "--print",
                "--model",
                request.model,
                "--dangerously-skip-permissions",
            ]
            .map(str::to_string),
        );
        argv
    }

    fn environment(&self) -> &HashMap<String, String> {
        &self.environment
    }
}
