//! Incident, chain and step types produced by causal analysis.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ModelError;
use crate::field::ResolvedField;
use crate::time_ring::TimeRing;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImpactDirection {
    #[default]
    HigherIsWorse,
    LowerIsWorse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncidentTimeWindow {
    pub start: DateTime<Utc>,
    pub peak: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl IncidentTimeWindow {
    pub fn is_valid(&self) -> bool {
        self.start < self.peak && self.peak <= self.end
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }
}

/// The impact under investigation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncidentContext {
    #[serde(default)]
    pub id: String,
    pub impact_service: ResolvedField,
    pub metric_name: ResolvedField,
    #[serde(default)]
    pub direction: ImpactDirection,
    pub window: IncidentTimeWindow,
    #[serde(default)]
    pub summary: String,
    pub severity: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GraphDirection {
    Same,
    Upstream,
    Downstream,
    #[default]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceRef {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
    #[serde(default)]
    pub details: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepTimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

fn unknown_distance() -> i32 {
    -1
}

/// One hop of a why-chain. `why_index` 1 is the user-visible layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RcaStep {
    pub why_index: u8,
    pub service: ResolvedField,
    #[serde(default)]
    pub component: ResolvedField,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_range: Option<StepTimeRange>,
    #[serde(default)]
    pub ring: TimeRing,
    #[serde(default)]
    pub direction: GraphDirection,
    #[serde(default = "unknown_distance")]
    pub distance: i32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evidence: Vec<EvidenceRef>,
    #[serde(default)]
    pub summary: String,
    pub score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formula: Option<String>,
}

impl RcaStep {
    pub fn new(why_index: u8, service: impl Into<ResolvedField>, score: f64) -> Self {
        Self {
            why_index,
            service: service.into(),
            component: ResolvedField::default(),
            time_range: None,
            ring: TimeRing::default(),
            direction: GraphDirection::default(),
            distance: unknown_distance(),
            evidence: Vec::new(),
            summary: String::new(),
            score,
            formula: None,
        }
    }

    pub fn with_component(mut self, component: impl Into<ResolvedField>) -> Self {
        self.component = component.into();
        self
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }

    pub fn with_ring(mut self, ring: TimeRing) -> Self {
        self.ring = ring;
        self
    }

    /// Best short description: component, then summary, then formula.
    pub fn detail(&self) -> &str {
        if !self.component.is_empty() {
            self.component.as_str()
        } else if !self.summary.trim().is_empty() {
            &self.summary
        } else {
            self.formula.as_deref().unwrap_or_default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RcaChain {
    pub steps: Vec<RcaStep>,
    pub score: f64,
    #[serde(default)]
    pub rank: u32,
    #[serde(default)]
    pub impact_path: Vec<String>,
    #[serde(default)]
    pub duration_hops: usize,
}

impl RcaChain {
    pub fn new(score: f64) -> Self {
        Self {
            steps: Vec::new(),
            score,
            rank: 0,
            impact_path: Vec::new(),
            duration_hops: 0,
        }
    }

    /// Build a chain from steps already in why-order.
    pub fn from_steps(score: f64, steps: Vec<RcaStep>) -> Result<Self, ModelError> {
        let mut chain = Self::new(score);
        for step in steps {
            chain.push_step(step)?;
        }
        Ok(chain)
    }

    /// Append the next (deeper) step. Gaps in `why_index` are allowed,
    /// repeats and reversals are not.
    pub fn push_step(&mut self, step: RcaStep) -> Result<(), ModelError> {
        if step.why_index == 0 {
            return Err(ModelError::InvalidWhyIndex(0));
        }
        if let Some(previous) = self.steps.last() {
            if step.why_index <= previous.why_index {
                return Err(ModelError::NonMonotonicWhyIndex {
                    previous: previous.why_index,
                    next: step.why_index,
                });
            }
        }
        self.impact_path.push(step.service.display.clone());
        self.steps.push(step);
        self.duration_hops = self.steps.len();
        Ok(())
    }

    pub fn deepest_step(&self) -> Option<&RcaStep> {
        self.steps.iter().max_by_key(|s| s.why_index)
    }

    /// Recompute `impact_path` and `duration_hops` from the steps.
    pub fn refresh_path(&mut self) {
        self.impact_path = self.steps.iter().map(|s| s.service.display.clone()).collect();
        self.duration_hops = self.steps.len();
    }
}

/// Output of causal analysis for one incident.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RcaIncident {
    pub impact: IncidentContext,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_cause: Option<RcaStep>,
    #[serde(default)]
    pub chains: Vec<RcaChain>,
    #[serde(default = "Utc::now")]
    pub generated_at: DateTime<Utc>,
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub notes: Vec<String>,
}

impl RcaIncident {
    pub fn new(impact: IncidentContext) -> Self {
        Self {
            impact,
            root_cause: None,
            chains: Vec::new(),
            generated_at: Utc::now(),
            score: 0.0,
            notes: Vec::new(),
        }
    }

    /// Append a discovered chain, re-rank, and re-derive the root cause.
    pub fn add_chain(&mut self, chain: RcaChain) -> Result<(), ModelError> {
        chain
            .validate()
            .map_err(|e| ModelError::in_chain(self.chains.len() + 1, e))?;
        self.chains.push(chain);
        self.rank_chains();
        self.derive_root_cause();
        Ok(())
    }

    /// Stable sort by score, best first; equal scores keep discovery order.
    pub fn rank_chains(&mut self) {
        self.chains.sort_by(|a, b| b.score.total_cmp(&a.score));
        for (i, chain) in self.chains.iter_mut().enumerate() {
            chain.rank = i as u32 + 1;
        }
    }

    /// Root cause = deepest step of the highest-scoring chain (first one
    /// wins on ties). Overall score follows that chain.
    pub fn derive_root_cause(&mut self) {
        let best = self.top_chain().map(|c| (c.score, c.deepest_step().cloned()));
        match best {
            Some((score, step)) => {
                self.root_cause = step;
                self.score = score;
            }
            None => {
                self.root_cause = None;
                self.score = 0.0;
            }
        }
    }

    /// Rank and derive in one go, e.g. after deserializing engine output.
    pub fn normalize(&mut self) {
        for chain in &mut self.chains {
            chain.refresh_path();
        }
        self.rank_chains();
        self.derive_root_cause();
    }

    pub fn top_chain(&self) -> Option<&RcaChain> {
        self.chains
            .iter()
            .reduce(|best, c| if c.score > best.score { c } else { best })
    }

    pub fn peak_time(&self) -> DateTime<Utc> {
        self.impact.window.peak
    }
}
