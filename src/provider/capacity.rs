//! Resource-exhaustion signatures in provider logs.

use regex::RegexBuilder;

/// A case-insensitive pattern and the follow-up it implies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapacitySignature {
    pub name: &'static str,
    pub pattern: &'static str,
    pub next_action: &'static str,
}

/// The first signature found in a log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapacityMatch {
    pub signature: &'static str,
    pub next_action: &'static str,
}

pub const RETRY_WITH_BACKOFF: &str = "retry_with_backoff";
pub const SWITCH_PROVIDER: &str = "switch_provider";

/// Lines the runner itself appends to a job log.
const RUNNER_LINE_PREFIX: &str = "[dx-runner ";

/// Quota phrases come first: a log that mentions both a 429 and an exhausted
/// quota needs a different provider, not a retry.
pub const DEFAULT_SIGNATURES: &[CapacitySignature] = &[
    CapacitySignature {
        name: "quota exceeded",
        pattern: r"\bquota exceeded\b",
        next_action: SWITCH_PROVIDER,
    },
    CapacitySignature {
        name: "insufficient_quota",
        pattern: r"\binsufficient_quota\b",
        next_action: SWITCH_PROVIDER,
    },
    CapacitySignature {
        name: "resource_exhausted",
        pattern: r"\bresource_exhausted\b",
        next_action: SWITCH_PROVIDER,
    },
    CapacitySignature {
        name: "usage limit",
        pattern: r"\busage limit\b",
        next_action: SWITCH_PROVIDER,
    },
    CapacitySignature {
        name: "rate limit",
        pattern: r"\brate[ _-]?limit",
        next_action: RETRY_WITH_BACKOFF,
    },
    CapacitySignature {
        name: "too many requests",
        pattern: r"\btoo many requests\b",
        next_action: RETRY_WITH_BACKOFF,
    },
    // A bare number is not evidence; it must read as an HTTP status.
    CapacitySignature {
        name: "429",
        pattern: r"\b(?:http(?:/\d(?:\.\d)?)?|status(?:\s+code)?|code|error)\s*[:=]?\s*429\b",
        next_action: RETRY_WITH_BACKOFF,
    },
];

/// Scan `log` for the first matching signature, in signature order.
///
/// Runner-written lines are not provider output and are skipped.
pub fn scan(log: &str, signatures: &[CapacitySignature]) -> Option<CapacityMatch> {
    let provider_output: String = log
        .lines()
        .filter(|line| !line.starts_with(RUNNER_LINE_PREFIX))
        .collect::<Vec<_>>()
        .join("\n");

    signatures.iter().find_map(|sig| {
        let re = match RegexBuilder::new(sig.pattern).case_insensitive(true).build() {
            Ok(re) => re,
            Err(e) => {
                tracing::warn!(signature = sig.name, error = %e, "invalid capacity pattern");
                return None;
            }
        };
        re.is_match(&provider_output).then_some(CapacityMatch {
            signature: sig.name,
            next_action: sig.next_action,
        })
    })
}
