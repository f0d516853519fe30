//! A3: the module-level Prometheus registry, grounded on the teacher's
//! `commands/reconcile.rs` `LazyLock<Registry>` pattern, generalized from a
//! single-purpose operator's metrics to the scheduler/ingest/reaper/leader
//! surface this crate exposes.

use std::sync::LazyLock;

use prometheus::{Encoder, IntCounter, IntCounterVec, Registry, TextEncoder};

pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

pub static SCHEDULER_TICKS: LazyLock<IntCounter> = LazyLock::new(|| {
    let c = IntCounter::new("kuberhealthy_scheduler_ticks_total", "Total scheduler ticks processed")
        .expect("metric definition is valid");
    REGISTRY.register(Box::new(c.clone())).expect("metric not yet registered");
    c
});

pub static REPORT_OUTCOMES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    let c = IntCounterVec::new(
        prometheus::Opts::new("kuberhealthy_report_outcomes_total", "Report ingestion outcomes by kind"),
        &["outcome"],
    )
    .expect("metric definition is valid");
    REGISTRY.register(Box::new(c.clone())).expect("metric not yet registered");
    c
});

pub static REAPER_DELETIONS: LazyLock<IntCounter> = LazyLock::new(|| {
    let c = IntCounter::new("kuberhealthy_reaper_deletions_total", "Total checker pods deleted by the reaper")
        .expect("metric definition is valid");
    REGISTRY.register(Box::new(c.clone())).expect("metric not yet registered");
    c
});

pub static LEADERSHIP_TRANSITIONS: LazyLock<IntCounter> = LazyLock::new(|| {
    let c = IntCounter::new(
        "kuberhealthy_leadership_transitions_total",
        "Total leadership acquisitions and losses observed by this replica",
    )
    .expect("metric definition is valid");
    REGISTRY.register(Box::new(c.clone())).expect("metric not yet registered");
    c
});

/// Render the registry in Prometheus text exposition format (`GET
/// /metrics`, always 200 per §6).
pub fn encode() -> String {
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&metric_families, &mut buffer)
        .expect("metric encoding is infallible for well-formed families");
    String::from_utf8(buffer).expect("prometheus text encoding is always valid utf-8")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_produces_registered_metric_names() {
        SCHEDULER_TICKS.inc();
        let text = encode();
        assert!(text.contains("kuberhealthy_scheduler_ticks_total"));
    }

    #[test]
    fn report_outcomes_is_labeled_by_kind() {
        REPORT_OUTCOMES.with_label_values(&["accept"]).inc();
        let text = encode();
        assert!(text.contains("kuberhealthy_report_outcomes_total"));
        assert!(text.contains("outcome=\"accept\""));
    }
}
