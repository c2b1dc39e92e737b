//! Auth / service-context preflight.
//!
//! Passes only when the deployment CLI reports an authenticated session and
//! the service URL variable is non-empty. Reason codes carry the provider
//! name so operators can tell which dispatch lost its credentials.

use super::GateResult;
use std::process::{Command, Stdio};

const GATE: &str = "auth";

/// Inputs for the auth preflight.
#[derive(Debug, Clone)]
pub struct AuthCheck<'a> {
    pub provider: &'a str,
    pub cli: &'a str,
    pub args: &'a [String],
    pub service_url_env: &'a str,
    /// Value of `service_url_env`, captured by the caller.
    pub service_url: Option<String>,
}

fn reason_prefix(provider: &str) -> String {
    provider.replace('-', "_")
}

pub fn check_auth(check: &AuthCheck<'_>) -> GateResult {
    let prefix = reason_prefix(check.provider);
    let session = Command::new(check.cli)
        .args(check.args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();

    match session {
        Ok(status) if status.success() => {}
        Ok(status) => {
            return GateResult::fail(
                GATE,
                format!("{}_auth_missing", prefix),
                format!(
                    "'{} {}' exited with {}; log in before dispatching {}",
                    check.cli,
                    check.args.join(" "),
                    status.code().unwrap_or(-1),
                    check.provider
                ),
            )
            .with_identifier("provider", check.provider);
        }
        Err(e) => {
            return GateResult::fail(
                GATE,
                format!("{}_auth_missing", prefix),
                format!("deployment CLI '{}' not runnable: {}", check.cli, e),
            )
            .with_identifier("provider", check.provider);
        }
    }

    match check.service_url.as_deref().map(str::trim) {
        Some(url) if !url.is_empty() => GateResult::pass(
            GATE,
            "auth_ok",
            format!("authenticated; {}={}", check.service_url_env, url),
        )
        .with_identifier("provider", check.provider),
        _ => GateResult::fail(
            GATE,
            format!("{}_service_context_missing", prefix),
            format!(
                "{} is empty; run inside the service context",
                check.service_url_env
            ),
        )
        .with_identifier("provider", check.provider),
    }
}
