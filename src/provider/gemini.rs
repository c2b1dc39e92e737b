//! gemini adapter.

use super::{LaunchRequest, ModelPolicy, ProviderAdapter, binary_argv, static_catalogue};
use crate::config::ProviderSettings;
use crate::error::Result;
use std::collections::HashMap;

const BUILTIN_MODELS: &[&str] = &["gemini-2.5-pro", "gemini-2.5-flash"];

pub struct Gemini {
    binary: Vec<String>,
    models: Vec<String>,
    environment: HashMap<String, String>,
}

impl Gemini {
    pub fn new(settings: &ProviderSettings) -> Result<Self> {
        Ok(Self {
            binary: binary_argv(settings.binary.as_deref(), "gemini")?,
            models: static_catalogue(&settings.models, BUILTIN_MODELS),
            environment: settings.environment.clone(),
        })
    }
}

impl ProviderAdapter for Gemini {
    fn name(&self) -> &'static str {
        "gemini"
    }

    fn binary(&self) -> &[String] {
        &self.binary
    }

    fn model_policy(&self) -> ModelPolicy {
        ModelPolicy {
            default_model: "gemini-2.5-pro",
            canonical_prefix: None,
            allow_fallback: true,
        }
    }

    fn list_models(&self) -> Result<Vec<String>> {
        Ok(self.models.clone())
    }

    fn launch_command(&self, request: &LaunchRequest<'_>) -> Vec<String> {
        let mut argv = self.binary.clone();
        argv.extend(["--model", request.model, "--yolo"].map(str::to_string));
        argv
    }

    fn environment(&self) -> &HashMap<String, String> {
        &self.environment
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ModelRequest;

    #[test]
    fn test_configured_models_replace_builtin() {
        let settings = ProviderSettings {
            models: vec!["gemini-3-pro".to_string(), "gemini-2.5-pro".to_string()],
            ..ProviderSettings::default()
        };
        let adapter = Gemini::new(&settings).unwrap();
        assert_eq!(adapter.list_models().unwrap().len(), 2);
        assert!(adapter.probe_model("gemini-3-pro"));
        assert!(!adapter.probe_model("gemini-2.5-flash"));
    }

    #[test]
    fn test_default_model_resolves() {
        let adapter = Gemini::new(&ProviderSettings::default()).unwrap();
        let resolution = adapter.resolve_model(&ModelRequest::default());
        assert_eq!(resolution.model(), Some("gemini-2.5-pro"));
        assert_eq!(resolution.fallback_reason(), None);
    }
}
