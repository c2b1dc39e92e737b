//! Canonical-only model resolution.
//!
//! Resolution is a pure function of the provider's policy, the request, and
//! the catalogue. It yields exactly one of: the requested model, the
//! provider default with a fallback reason, or `unavailable` with a reason.
//! A blank model is never returned.

use crate::error::Result;
use serde::Serialize;

/// How a provider treats model ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelPolicy {
    pub default_model: &'static str,
    /// Only ids with this prefix are accepted, when set.
    pub canonical_prefix: Option<&'static str>,
    /// Whether a rejected request may fall back to the default model.
    pub allow_fallback: bool,
}

/// What the caller asked for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelRequest {
    /// Explicit `--model` (or profile model).
    pub requested: Option<String>,
    /// Ambient override captured from the environment.
    pub env_override: Option<String>,
    /// Honour `env_override` only when set.
    pub allow_override: bool,
}

impl ModelRequest {
    pub fn explicit(model: Option<String>) -> Self {
        Self {
            requested: model,
            ..Self::default()
        }
    }

    /// The model id to resolve, before defaults.
    pub fn effective(&self) -> Option<&str> {
        if self.allow_override
            && let Some(model) = self.env_override.as_deref()
        {
            return Some(model);
        }
        self.requested.as_deref()
    }
}

/// Result of resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Resolution {
    Resolved { model: String },
    Fallback { model: String, reason: String },
    Unavailable { reason: String },
}

impl Resolution {
    /// Selected model, when one was chosen.
    pub fn model(&self) -> Option<&str> {
        match self {
            Resolution::Resolved { model } | Resolution::Fallback { model, .. } => Some(model),
            Resolution::Unavailable { .. } => None,
        }
    }

    pub fn fallback_reason(&self) -> Option<&str> {
        match self {
            Resolution::Fallback { reason, .. } => Some(reason),
            _ => None,
        }
    }
}

/// Resolve a request against a policy and catalogue.
pub fn resolve(
    policy: &ModelPolicy,
    request: &ModelRequest,
    catalogue: Result<Vec<String>>,
) -> Resolution {
    let requested = request
        .effective()
        .map(str::trim)
        .unwrap_or(policy.default_model);

    if requested.is_empty() {
        return Resolution::Unavailable {
            reason: "empty_model".to_string(),
        };
    }

    if let Some(prefix) = policy.canonical_prefix
        && !requested.starts_with(prefix)
    {
        return fallback_or(
            policy,
            &[],
            format!("non_canonical_model:{}", requested),
        );
    }

    let catalogue = match catalogue {
        Ok(models) => models,
        Err(e) => {
            tracing::warn!(error = %e, "model catalogue unavailable");
            return if policy.allow_fallback {
                Resolution::Fallback {
                    model: policy.default_model.to_string(),
                    reason: "catalogue_unavailable".to_string(),
                }
            } else {
                Resolution::Unavailable {
                    reason: format!("model_catalogue_unavailable:{}", requested),
                }
            };
        }
    };

    if catalogue.iter().any(|m| m == requested) {
        return Resolution::Resolved {
            model: requested.to_string(),
        };
    }

    fallback_or(
        policy,
        &catalogue,
        format!("model_not_in_catalogue:{}", requested),
    )
}

/// Fall back to the default when allowed (and listed, if a catalogue is
/// known); otherwise `unavailable` with `reason`.
fn fallback_or(policy: &ModelPolicy, catalogue: &[String], reason: String) -> Resolution {
    let default_listed =
        catalogue.is_empty() || catalogue.iter().any(|m| m == policy.default_model);

    if policy.allow_fallback && default_listed {
        let requested = reason.split_once(':').map(|(_, m)| m).unwrap_or_default();
        Resolution::Fallback {
            model: policy.default_model.to_string(),
            reason: format!("requested_model_unavailable:{}", requested),
        }
    } else {
        Resolution::Unavailable { reason }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RunnerError;

    const CANONICAL: ModelPolicy = ModelPolicy {
        default_model: "zhipuai-coding-plan/glm-5",
        canonical_prefix: Some("zhipuai-coding-plan/"),
        allow_fallback: false,
    };

    const FALLBACK: ModelPolicy = ModelPolicy {
        default_model: "glm-5",
        canonical_prefix: None,
        allow_fallback: true,
    };

    fn catalogue(models: &[&str]) -> Result<Vec<String>> {
        Ok(models.iter().map(|m| m.to_string()).collect())
    }

    #[test]
    fn test_default_model_resolves_when_listed() {
        let resolution = resolve(
            &CANONICAL,
            &ModelRequest::default(),
            catalogue(&["zhipuai-coding-plan/glm-5", "zai-coding-plan/glm-5"]),
        );
        assert_eq!(
            resolution,
            Resolution::Resolved {
                model: "zhipuai-coding-plan/glm-5".to_string()
            }
        );
    }

    #[test]
    fn test_other_namespace_rejected_even_if_listed() {
        let request = ModelRequest::explicit(Some("zai-coding-plan/glm-5".to_string()));
        let resolution = resolve(
            &CANONICAL,
            &request,
            catalogue(&["zhipuai-coding-plan/glm-5", "zai-coding-plan/glm-5"]),
        );
        assert_eq!(
            resolution,
            Resolution::Unavailable {
                reason: "non_canonical_model:zai-coding-plan/glm-5".to_string()
            }
        );
    }

    #[test]
    fn test_canonical_missing_from_catalogue_is_unavailable() {
        let resolution = resolve(
            &CANONICAL,
            &ModelRequest::default(),
            catalogue(&["zhipuai-coding-plan/glm-4.7"]),
        );
        assert_eq!(
            resolution,
            Resolution::Unavailable {
                reason: "model_not_in_catalogue:zhipuai-coding-plan/glm-5".to_string()
            }
        );
    }

    #[test]
    fn test_env_override_ignored_without_allow_flag() {
        let mut request = ModelRequest {
            requested: None,
            env_override: Some("zai-coding-plan/glm-5".to_string()),
            allow_override: false,
        };
        let listed = || catalogue(&["zhipuai-coding-plan/glm-5", "zai-coding-plan/glm-5"]);
        assert_eq!(
            resolve(&CANONICAL, &request, listed()).model(),
            Some("zhipuai-coding-plan/glm-5")
        );

        request.allow_override = true;
        assert!(matches!(
            resolve(&CANONICAL, &request, listed()),
            Resolution::Unavailable { .. }
        ));
    }

    #[test]
    fn test_fallback_policy_returns_default_with_reason() {
        let request = ModelRequest::explicit(Some("glm-9".to_string()));
        let resolution = resolve(&FALLBACK, &request, catalogue(&["glm-5", "glm-4.7"]));
        assert_eq!(resolution.model(), Some("glm-5"));
        assert_eq!(
            resolution.fallback_reason(),
            Some("requested_model_unavailable:glm-9")
        );
    }

    #[test]
    fn test_fallback_requires_default_in_catalogue() {
        let request = ModelRequest::explicit(Some("glm-9".to_string()));
        let resolution = resolve(&FALLBACK, &request, catalogue(&["glm-4.7"]));
        assert!(matches!(resolution, Resolution::Unavailable { .. }));
    }

    #[test]
    fn test_catalogue_error_handling_depends_on_policy() {
        let err = || Err(RunnerError::UserError("offline".to_string()));
        let fb = resolve(&FALLBACK, &ModelRequest::default(), err());
        assert_eq!(fb.fallback_reason(), Some("catalogue_unavailable"));

        let strict = resolve(&CANONICAL, &ModelRequest::default(), err());
        assert_eq!(
            strict,
            Resolution::Unavailable {
                reason: "model_catalogue_unavailable:zhipuai-coding-plan/glm-5".to_string()
            }
        );
    }

    #[test]
    fn test_never_blank() {
        let request = ModelRequest::explicit(Some("   ".to_string()));
        for policy in [CANONICAL, FALLBACK] {
            let resolution = resolve(&policy, &request, catalogue(&["glm-5"]));
            match resolution {
                Resolution::Resolved { model } | Resolution::Fallback { model, .. } => {
                    assert!(!model.is_empty())
                }
                Resolution::Unavailable { reason } => assert_eq!(reason, "empty_model"),
            }
        }
    }
}
