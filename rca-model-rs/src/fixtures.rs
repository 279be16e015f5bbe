//! Incidents shared by the tests of this crate and its dependents.
//! Compiled for tests and with the `test-fixtures` feature.

use chrono::{Duration, TimeZone, Utc};

use crate::incident::{ImpactDirection, IncidentContext, IncidentTimeWindow, RcaChain, RcaStep};

/// Checkout latency incident peaking at 2024-03-01 12:00 UTC.
pub fn context() -> IncidentContext {
    let peak = Utc
        .with_ymd_and_hms(2024, 3, 1, 12, 0, 0)
        .single()
        .expect("fixed fixture timestamp");
    IncidentContext {
        id: "inc-1".to_string(),
        impact_service: "checkout".into(),
        metric_name: "p99_latency".into(),
        direction: ImpactDirection::HigherIsWorse,
        window: IncidentTimeWindow {
            start: peak - Duration::minutes(10),
            peak,
            end: peak + Duration::minutes(5),
        },
        summary: "checkout latency spike".to_string(),
        severity: 0.8,
    }
}

pub fn chain(score: f64, services: &[(u8, &str)]) -> RcaChain {
    let steps = services
        .iter()
        .map(|(i, svc)| RcaStep::new(*i, *svc, score))
        .collect();
    RcaChain::from_steps(score, steps).expect("fixture chain steps are valid")
}
