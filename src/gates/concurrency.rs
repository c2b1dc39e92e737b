//! Per-provider concurrency cap, enforced only at `start`.

use super::GateResult;

const GATE: &str = "concurrency";

/// Fail when `live` jobs already fill `cap`.
pub fn check_concurrency(provider: &str, live: usize, cap: u32) -> GateResult {
    let result = if live < cap as usize {
        GateResult::pass(
            GATE,
            "concurrency_ok",
            format!("{} has {}/{} live jobs", provider, live, cap),
        )
    } else {
        GateResult::fail(
            GATE,
            "concurrency_cap_exceeded",
            format!(
                "{} already has {}/{} live jobs; wait for one to finish or raise max_concurrent",
                provider, live, cap
            ),
        )
    };
    result
        .with_identifier("live", live.to_string())
        .with_identifier("cap", cap.to_string())
}
