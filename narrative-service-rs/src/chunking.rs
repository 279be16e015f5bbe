//! Splits an incident into prompt-sized chunks.
//!
//! Chunk 0 carries only the impact, the root cause and the ring legend.
//! Chains follow in groups: up to five chains share one chunk, larger sets
//! are cut into groups of five. A chain is never split across chunks and only
//! the per-step fields the narrative needs are copied.

use chrono::{DateTime, Utc};
use rca_model::{
    ImpactDirection, RcaChain, RcaIncident, RcaStep, RingDefinition, TimeRing, TimeRingConfig,
};
use serde::Serialize;
use tracing::{debug, warn};

use crate::prompt::estimate_tokens;

pub const CHAINS_PER_GROUP: usize = 5;

/// Chains per chain-group chunk for an incident with `total_chains` chains.
pub fn group_size(total_chains: usize) -> usize {
    match total_chains {
        0..=5 => total_chains.max(1),
        6..=10 => CHAINS_PER_GROUP,
        _ => CHAINS_PER_GROUP,
    }
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImpactDigest {
    pub service: String,
    pub metric: String,
    pub direction: ImpactDirection,
    pub severity: f64,
    pub window_start: DateTime<Utc>,
    pub window_peak: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RootCauseDigest {
    pub service: String,
    pub component: String,
    pub score: f64,
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeRingContext {
    pub peak_time: DateTime<Utc>,
    pub rings: Vec<RingDefinition>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryChunk {
    pub impact: ImpactDigest,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root_cause: Option<RootCauseDigest>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_rings: Option<TimeRingContext>,
    pub chain_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepDigest {
    pub why_index: u8,
    pub service: String,
    pub detail: String,
    pub score: f64,
    pub ring: TimeRing,
}

impl From<&RcaStep> for StepDigest {
    fn from(step: &RcaStep) -> Self {
        Self {
            why_index: step.why_index,
            service: step.service.display.clone(),
            detail: step.detail().to_string(),
            score: round3(step.score),
            ring: step.ring,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainDigest {
    pub rank: u32,
    pub score: f64,
    pub steps: Vec<StepDigest>,
}

impl From<&RcaChain> for ChainDigest {
    fn from(chain: &RcaChain) -> Self {
        Self {
            rank: chain.rank,
            score: round3(chain.score),
            steps: chain.steps.iter().map(StepDigest::from).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainGroupChunk {
    /// 1-based position among the chain groups.
    pub group: usize,
    pub group_count: usize,
    pub total_chains: usize,
    pub chains: Vec<ChainDigest>,
}

impl ChainGroupChunk {
    pub fn rank_range(&self) -> (u32, u32) {
        let first = self.chains.first().map(|c| c.rank).unwrap_or_default();
        let last = self.chains.last().map(|c| c.rank).unwrap_or_default();
        (first, last)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Chunk {
    Summary(SummaryChunk),
    ChainGroup(ChainGroupChunk),
}

impl Chunk {
    pub fn label(&self) -> String {
        match self {
            Chunk::Summary(_) => "Impact and Root Cause".to_string(),
            Chunk::ChainGroup(group) => {
                let (first, last) = group.rank_range();
                if first == last {
                    format!("Causal Chain {} of {}", first, group.total_chains)
                } else {
                    format!("Causal Chains {}-{} of {}", first, last, group.total_chains)
                }
            }
        }
    }

    /// Compact JSON of the chunk's fields.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|err| {
            warn!(error = %err, "chunk serialization failed");
            String::from("{}")
        })
    }

    pub fn chain_count(&self) -> usize {
        match self {
            Chunk::Summary(_) => 0,
            Chunk::ChainGroup(group) => group.chains.len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChunkPlan {
    chunks: Vec<Chunk>,
    max_tokens_per_chunk: usize,
}

impl ChunkPlan {
    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn max_tokens_per_chunk(&self) -> usize {
        self.max_tokens_per_chunk
    }

    pub fn iter(&self) -> impl Iterator<Item = &Chunk> {
        self.chunks.iter()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChunkPlanner {
    rings: TimeRingConfig,
}

impl ChunkPlanner {
    pub fn new(rings: TimeRingConfig) -> Self {
        Self { rings }
    }

    pub fn plan(&self, incident: &RcaIncident, max_tokens_per_chunk: usize) -> ChunkPlan {
        let mut chunks = Vec::with_capacity(1 + incident.chains.len().div_ceil(CHAINS_PER_GROUP));
        chunks.push(Chunk::Summary(self.summary(incident)));

        // Chains are ranked before grouping so group order follows rank.
        let mut ranked: Vec<&RcaChain> = incident.chains.iter().collect();
        ranked.sort_by(|a, b| b.score.total_cmp(&a.score));

        let total = ranked.len();
        if total > 0 {
            let size = group_size(total);
            let group_count = total.div_ceil(size);
            for (i, group) in ranked.chunks(size).enumerate() {
                let chains = group
                    .iter()
                    .enumerate()
                    .map(|(j, chain)| {
                        let mut digest = ChainDigest::from(*chain);
                        if digest.rank == 0 {
                            digest.rank = (i * size + j + 1) as u32;
                        }
                        digest
                    })
                    .collect();
                chunks.push(Chunk::ChainGroup(ChainGroupChunk {
                    group: i + 1,
                    group_count,
                    total_chains: total,
                    chains,
                }));
            }
        }

        for (i, chunk) in chunks.iter().enumerate() {
            let estimate = estimate_tokens(&chunk.to_json());
            if estimate > max_tokens_per_chunk {
                warn!(
                    chunk_number = i + 1,
                    estimated_tokens = estimate,
                    max_tokens_per_chunk,
                    "chunk data exceeds the per-chunk token budget"
                );
            }
        }
        debug!(chunks = chunks.len(), chains = total, "incident chunk plan built");

        ChunkPlan {
            chunks,
            max_tokens_per_chunk,
        }
    }

    fn summary(&self, incident: &RcaIncident) -> SummaryChunk {
        let impact = &incident.impact;
        let root_cause = incident.root_cause.as_ref().map(|step| RootCauseDigest {
            service: step.service.display.clone(),
            component: step.component.display.clone(),
            score: round3(step.score),
            summary: step.summary.clone(),
        });
        let time_rings = incident.top_chain().map(|_| TimeRingContext {
            peak_time: incident.peak_time(),
            rings: self.rings.definitions(),
        });

        SummaryChunk {
            impact: ImpactDigest {
                service: impact.impact_service.display.clone(),
                metric: impact.metric_name.display.clone(),
                direction: impact.direction,
                severity: round3(impact.severity),
                window_start: impact.window.start,
                window_peak: impact.window.peak,
                window_end: impact.window.end,
            },
            root_cause,
            time_rings,
            chain_count: incident.chains.len(),
        }
    }
}

/// Plan with the default ring legend.
pub fn plan(incident: &RcaIncident, max_tokens_per_chunk: usize) -> ChunkPlan {
    ChunkPlanner::default().plan(incident, max_tokens_per_chunk)
}
