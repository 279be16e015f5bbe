//! Classification of event times relative to the incident peak.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum TimeRing {
    #[serde(rename = "R1_IMMEDIATE")]
    Immediate,
    #[serde(rename = "R2_SHORT")]
    Short,
    #[serde(rename = "R3_MEDIUM")]
    Medium,
    #[serde(rename = "R4_LONG")]
    Long,
    #[default]
    #[serde(rename = "R_OUT_OF_SCOPE")]
    OutOfScope,
}

impl TimeRing {
    pub const IN_SCOPE: [TimeRing; 4] = [
        TimeRing::Immediate,
        TimeRing::Short,
        TimeRing::Medium,
        TimeRing::Long,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TimeRing::Immediate => "R1_IMMEDIATE",
            TimeRing::Short => "R2_SHORT",
            TimeRing::Medium => "R3_MEDIUM",
            TimeRing::Long => "R4_LONG",
            TimeRing::OutOfScope => "R_OUT_OF_SCOPE",
        }
    }

    pub fn is_in_scope(&self) -> bool {
        *self != TimeRing::OutOfScope
    }

    /// Lower is closer to the peak.
    pub fn priority(&self) -> u8 {
        match self {
            TimeRing::Immediate => 0,
            TimeRing::Short => 1,
            TimeRing::Medium => 2,
            TimeRing::Long => 3,
            TimeRing::OutOfScope => u8::MAX,
        }
    }

    fn description(&self) -> &'static str {
        match self {
            TimeRing::Immediate => "immediately before the peak",
            TimeRing::Short => "shortly before the peak",
            TimeRing::Medium => "a few minutes before the peak",
            TimeRing::Long => "early in the lookback window",
            TimeRing::OutOfScope => "outside the analysis window",
        }
    }
}

impl fmt::Display for TimeRing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ring boundaries, all measured backwards from the peak.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRingConfig {
    pub r1: Duration,
    pub r2: Duration,
    pub r3: Duration,
    pub r4: Duration,
    /// Late telemetry within this much after the peak counts as immediate.
    pub after_peak: Option<Duration>,
}

impl Default for TimeRingConfig {
    fn default() -> Self {
        Self {
            r1: Duration::seconds(5),
            r2: Duration::seconds(30),
            r3: Duration::minutes(2),
            r4: Duration::minutes(10),
            after_peak: Some(Duration::seconds(30)),
        }
    }
}

impl TimeRingConfig {
    pub fn assign(&self, peak: DateTime<Utc>, event: DateTime<Utc>) -> TimeRing {
        let before_peak = peak - event;

        if before_peak < Duration::zero() {
            return match self.after_peak {
                Some(grace) if event - peak <= grace => TimeRing::Immediate,
                _ => TimeRing::OutOfScope,
            };
        }

        if before_peak <= self.r1 {
            TimeRing::Immediate
        } else if before_peak <= self.r2 {
            TimeRing::Short
        } else if before_peak <= self.r3 {
            TimeRing::Medium
        } else if before_peak <= self.r4 {
            TimeRing::Long
        } else {
            TimeRing::OutOfScope
        }
    }

    /// Window of `ring` as `(farthest, nearest)` offsets before the peak.
    pub fn bounds(&self, ring: TimeRing) -> Option<(Duration, Duration)> {
        match ring {
            TimeRing::Immediate => Some((self.r1, Duration::zero())),
            TimeRing::Short => Some((self.r2, self.r1)),
            TimeRing::Medium => Some((self.r3, self.r2)),
            TimeRing::Long => Some((self.r4, self.r3)),
            TimeRing::OutOfScope => None,
        }
    }

    /// One line per in-scope ring, used when framing the narrative.
    pub fn definitions(&self) -> Vec<RingDefinition> {
        TimeRing::IN_SCOPE
            .iter()
            .filter_map(|ring| {
                let (far, near) = self.bounds(*ring)?;
                Some(RingDefinition {
                    ring: *ring,
                    window: format!("T-{} to T-{}", human(far), human(near)),
                    description: ring.description().to_string(),
                })
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RingDefinition {
    pub ring: TimeRing,
    pub window: String,
    pub description: String,
}

fn human(d: Duration) -> String {
    let secs = d.num_seconds();
    if secs == 0 {
        "0s".to_string()
    } else if secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{}s", secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn peak() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn assigns_rings_by_distance_before_peak() {
        let cfg = TimeRingConfig::default();
        let p = peak();

        assert_eq!(cfg.assign(p, p), TimeRing::Immediate);
        assert_eq!(cfg.assign(p, p - Duration::seconds(5)), TimeRing::Immediate);
        assert_eq!(cfg.assign(p, p - Duration::seconds(6)), TimeRing::Short);
        assert_eq!(cfg.assign(p, p - Duration::seconds(90)), TimeRing::Medium);
        assert_eq!(cfg.assign(p, p - Duration::minutes(9)), TimeRing::Long);
        assert_eq!(cfg.assign(p, p - Duration::minutes(11)), TimeRing::OutOfScope);
    }

    #[test]
    fn late_events_use_the_grace_window() {
        let p = peak();
        let cfg = TimeRingConfig::default();
        assert_eq!(cfg.assign(p, p + Duration::seconds(20)), TimeRing::Immediate);
        assert_eq!(cfg.assign(p, p + Duration::seconds(31)), TimeRing::OutOfScope);

        let strict = TimeRingConfig {
            after_peak: None,
            ..cfg
        };
        assert_eq!(strict.assign(p, p + Duration::seconds(1)), TimeRing::OutOfScope);
    }

    #[test]
    fn priority_orders_by_proximity() {
        let mut rings = vec![TimeRing::OutOfScope, TimeRing::Long, TimeRing::Immediate, TimeRing::Medium];
        rings.sort_by_key(TimeRing::priority);
        assert_eq!(
            rings,
            vec![TimeRing::Immediate, TimeRing::Medium, TimeRing::Long, TimeRing::OutOfScope]
        );
        assert!(!TimeRing::OutOfScope.is_in_scope());
    }

    #[test]
    fn definitions_cover_in_scope_rings() {
        let defs = TimeRingConfig::default().definitions();
        assert_eq!(defs.len(), 4);
        assert_eq!(defs[0].window, "T-5s to T-0s");
        assert_eq!(defs[2].window, "T-2m to T-30s");
        assert_eq!(
            serde_json::to_value(&defs[3]).unwrap()["ring"],
            serde_json::json!("R4_LONG")
        );
    }
}
