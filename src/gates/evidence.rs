//! Evidence gate: checklist claims in a signoff are cross-checked against
//! the job's own Outcome.
//!
//! Only checked items (`- [x] ...`) are claims. A claim is supported when a
//! recognised keyword maps it to an Outcome field that agrees. Anything the
//! gate cannot verify is reported as unsupported rather than trusted.

use super::GateResult;
use crate::job::{Outcome, OutcomeState};
use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;

const GATE: &str = "evidence";

static CHECKBOX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*[-*]\s*\[([ xX])\]\s*(.+?)\s*$").expect("valid checkbox regex")
});

static EXIT_CODE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"exit(?:ed)?(?:\s+(?:code|status|with))?\s*[:=]?\s*(-?\d+)")
        .expect("valid exit code regex")
});

static MUTATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+)\s+files?\s+(?:changed|modified|touched)").expect("valid mutation regex")
});

/// Facts the Outcome alone cannot answer.
#[derive(Debug, Clone, Copy, Default)]
pub struct EvidenceFacts {
    /// Whether HEAD moved past the launch commit; `None` when unknown.
    pub new_commit: Option<bool>,
}

/// One parsed claim and its verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClaimCheck {
    pub claim: String,
    pub supported: bool,
    pub reason: String,
}

/// Extract checked checklist items from a signoff.
pub fn parse_claims(signoff: &str) -> Vec<String> {
    signoff
        .lines()
        .filter_map(|line| CHECKBOX_RE.captures(line))
        .filter(|caps| caps[1].eq_ignore_ascii_case("x"))
        .map(|caps| caps[2].to_string())
        .collect()
}

/// Decide one claim against the Outcome.
pub fn check_claim(claim: &str, outcome: &Outcome, facts: &EvidenceFacts) -> ClaimCheck {
    let lower = claim.to_lowercase();
    let verdict = |supported: bool, reason: String| ClaimCheck {
        claim: claim.to_string(),
        supported,
        reason,
    };

    if let Some(caps) = EXIT_CODE_RE.captures(&lower) {
        let claimed: i32 = caps[1].parse().unwrap_or(i32::MIN);
        return verdict(
            claimed == outcome.exit_code,
            format!("outcome exit_code={}", outcome.exit_code),
        );
    }

    if let Some(caps) = MUTATION_RE.captures(&lower) {
        let claimed: u64 = caps[1].parse().unwrap_or(u64::MAX);
        return verdict(
            outcome.mutation_count == Some(claimed),
            format!("outcome mutation_count={}", fmt_opt(outcome.mutation_count)),
        );
    }

    if lower.contains("commit") {
        return match facts.new_commit {
            Some(moved) => verdict(moved, format!("new commit present: {}", moved)),
            None => verdict(false, "commit history unavailable".to_string()),
        };
    }

    if lower.contains("log") {
        return verdict(
            outcome.log_bytes > 0,
            format!("outcome log_bytes={}", outcome.log_bytes),
        );
    }

    if lower.contains("model") {
        let named = !outcome.selected_model.is_empty()
            && lower.contains(&outcome.selected_model.to_lowercase());
        return verdict(
            named,
            format!("outcome selected_model={}", outcome.selected_model),
        );
    }

    if lower.contains("changed") || lower.contains("modified") || lower.contains("files") {
        return verdict(
            outcome.mutation_count.is_some_and(|n| n > 0),
            format!("outcome mutation_count={}", fmt_opt(outcome.mutation_count)),
        );
    }

    if ["complete", "done", "success", "finished", "pass"]
        .iter()
        .any(|kw| lower.contains(kw))
    {
        let ok = outcome.state == OutcomeState::ExitedOk && outcome.mutation_count != Some(0);
        return verdict(ok, format!("outcome state={}", outcome.state));
    }

    verdict(false, "no outcome field can verify this claim".to_string())
}

fn fmt_opt(value: Option<u64>) -> String {
    value.map_or_else(|| "unknown".to_string(), |v| v.to_string())
}

/// Run the evidence gate over a signoff document.
pub fn check_evidence(
    signoff: Option<&str>,
    outcome: Option<&Outcome>,
    facts: &EvidenceFacts,
) -> (GateResult, Vec<ClaimCheck>) {
    let Some(outcome) = outcome else {
        return (
            GateResult::fail(
                GATE,
                "evidence_outcome_missing",
                "job has no outcome yet; claims cannot be verified",
            ),
            Vec::new(),
        );
    };

    let claims = signoff.map(parse_claims).unwrap_or_default();
    if claims.is_empty() {
        return (
            GateResult::fail(
                GATE,
                "evidence_signoff_missing",
                "signoff contains no checked claims ('- [x] ...')",
            ),
            Vec::new(),
        );
    }

    let checks: Vec<ClaimCheck> = claims
        .iter()
        .map(|c| check_claim(c, outcome, facts))
        .collect();
    let unsupported: Vec<&ClaimCheck> = checks.iter().filter(|c| !c.supported).collect();

    let result = if unsupported.is_empty() {
        GateResult::pass(
            GATE,
            "evidence_ok",
            format!("{} claim(s) supported by the outcome", checks.len()),
        )
    } else {
        let listed: Vec<String> = unsupported
            .iter()
            .map(|c| format!("'{}' ({})", c.claim, c.reason))
            .collect();
        GateResult::fail(
            GATE,
            "evidence_unsupported_claims",
            format!(
                "{} of {} claim(s) unsupported: {}",
                unsupported.len(),
                checks.len(),
                listed.join("; ")
            ),
        )
    };

    let result = result
        .with_identifier("claims", checks.len().to_string())
        .with_identifier("unsupported", unsupported.len().to_string());
    (result, checks)
}
