//! Implementations of `dx-runner preflight`, `probe` and `profiles`.

use super::{Env, print_json, require_provider};
use crate::cli::CheckArgs;
use crate::config::PreflightMode;
use crate::error::Result;
use crate::exit_codes;
use crate::gates::GateResult;
use crate::gates::auth::{AuthCheck, check_auth};
use crate::provider::model::{ModelRequest, Resolution};
use crate::provider::{self, ProviderAdapter};
use serde_json::json;

fn auth_gate(env: &Env, provider: &str) -> GateResult {
    check_auth(&AuthCheck {
        provider,
        cli: &env.config.auth_cli,
        args: &env.config.auth_check_args,
        service_url_env: &env.config.service_url_env,
        service_url: std::env::var(&env.config.service_url_env).ok(),
    })
}

fn model_gate(adapter: &dyn ProviderAdapter, resolution: &Resolution) -> GateResult {
    match resolution {
        Resolution::Resolved { model } => {
            GateResult::pass("model", "model_resolved", format!("{} resolves exactly", model))
        }
        Resolution::Fallback { model, reason } => GateResult::pass(
            "model",
            "model_fallback",
            format!("falls back to {} ({})", model, reason),
        ),
        Resolution::Unavailable { reason } => GateResult::fail(
            "model",
            "model_unavailable",
            format!("no model available for {}: {}", adapter.name(), reason),
        ),
    }
}

/// Execute the `dx-runner preflight` command.
///
/// Runs the adapter preflight, the auth gate when the provider requires it,
/// and a model resolution for `--model` (or the provider default). The exit
/// code is that of the first failing check.
pub fn cmd_preflight(env: &Env, args: CheckArgs) -> Result<i32> {
    let provider = require_provider(&args.job, None)?;
    let adapter = provider::adapter_for(provider, &env.ctx, &env.config)?;

    let mut checks = vec![adapter.preflight()];
    if env.config.provider(provider).auth_preflight {
        checks.push(auth_gate(env, provider));
    }
    let resolution = adapter.resolve_model(&ModelRequest::explicit(args.job.model.clone()));
    checks.push(model_gate(adapter.as_ref(), &resolution));

    let exit_code = checks
        .iter()
        .find(|c| !c.passed)
        .map_or(exit_codes::SUCCESS, GateResult::exit_code);

    if env.json {
        print_json(&json!({
            "provider": provider,
            "ok": exit_code == exit_codes::SUCCESS,
            "exit_code": exit_code,
            "checks": checks,
            "resolution": resolution,
        }))?;
        return Ok(exit_code);
    }

    println!("Preflight for {}:", provider);
    for check in &checks {
        println!(
            "  [{}] {:<10} {} ({})",
            if check.passed { "PASS" } else { "FAIL" },
            check.gate,
            check.details,
            check.reason_code
        );
    }

    Ok(exit_code)
}

/// Execute the `dx-runner probe` command.
pub fn cmd_probe(env: &Env, args: CheckArgs) -> Result<i32> {
    let provider = require_provider(&args.job, None)?;
    let adapter = provider::adapter_for(provider, &env.ctx, &env.config)?;
    let model = args
        .job
        .model
        .clone()
        .unwrap_or_else(|| adapter.model_policy().default_model.to_string());

    let available = adapter.probe_model(&model);
    let exit_code = if available {
        exit_codes::SUCCESS
    } else {
        exit_codes::MODEL_UNAVAILABLE
    };

    if env.json {
        let resolution = adapter.resolve_model(&ModelRequest::explicit(Some(model.clone())));
        print_json(&json!({
            "provider": provider,
            "model": model,
            "available": available,
            "resolution": resolution,
            "exit_code": exit_code,
        }))?;
    } else if available {
        println!("{} is available on {}", model, provider);
    } else {
        println!("{} is NOT available on {}", model, provider);
    }

    Ok(exit_code)
}

fn preflight_name(mode: PreflightMode) -> &'static str {
    match mode {
        PreflightMode::Strict => "strict",
        PreflightMode::Lenient => "lenient",
        PreflightMode::Skip => "skip",
    }
}

/// Execute the `dx-runner profiles` command.
pub fn cmd_profiles(env: &Env) -> Result<i32> {
    if env.json {
        print_json(&json!({ "profiles": env.config.profiles }))?;
        return Ok(exit_codes::SUCCESS);
    }

    if env.config.profiles.is_empty() {
        println!("No profiles configured.");
        return Ok(exit_codes::SUCCESS);
    }

    for (name, profile) in &env.config.profiles {
        let gates: Vec<String> = profile.gates.iter().map(ToString::to_string).collect();
        println!("{}", name);
        println!("  provider:  {}", profile.provider);
        println!(
            "  model:     {}",
            profile.model.as_deref().unwrap_or("(provider default)")
        );
        println!("  preflight: {}", preflight_name(profile.preflight));
        if !gates.is_empty() {
            println!("  gates:     {}", gates.join(", "));
        }
        if !profile.description.is_empty() {
            println!("  {}", profile.description);
        }
    }

    Ok(exit_codes::SUCCESS)
}
