//! Runs the chunk plan through a generator, strictly in order.
//!
//! Each chunk after the first sees a bounded tail of the previous chunk's own
//! output. The first failure aborts the run and names the chunk. With more
//! than one chunk the stitched parts can be merged by a synthesis call; if
//! that call fails the stitched text is kept.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use config_rs::PipelineConfig;
use rca_model::RcaIncident;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::chunking::{ChunkPlan, ChunkPlanner};
use crate::error::OrchestratorError;
use crate::generator::NarrativeGenerator;
use crate::prompt::PromptBuilder;
use crate::task::stage;

pub const NARRATIVE_TITLE: &str = "# Root Cause Analysis Summary";

/// Receives stage updates while a run is in progress.
#[async_trait]
pub trait ChunkProgress: Send + Sync {
    async fn stage(&self, current_chunk: usize, total_chunks: usize, stage: &str);
}

pub struct NoopProgress;

#[async_trait]
impl ChunkProgress for NoopProgress {
    async fn stage(&self, _current_chunk: usize, _total_chunks: usize, _stage: &str) {}
}

#[derive(Debug, Clone, PartialEq)]
pub struct NarrativeOutcome {
    pub text: String,
    pub total_tokens: u64,
    /// True only when every generator call was served from cache.
    pub all_cached: bool,
    pub chunk_count: usize,
    pub synthesized: bool,
    pub provider: String,
    pub model: String,
}

fn footer(segments: usize) -> String {
    format!("\n\n---\n*Analysis generated from {} data segments*", segments)
}

/// Join chunk outputs under the summary title, one sub-heading per chunk.
pub fn stitch(plan: &ChunkPlan, outputs: &[String]) -> String {
    let mut text = format!("{}\n\n", NARRATIVE_TITLE);
    for (i, (chunk, output)) in plan.iter().zip(outputs).enumerate() {
        if i > 0 {
            text.push_str("\n\n");
        }
        text.push_str(&format!("## Part {}: {}\n\n", i + 1, chunk.label()));
        text.push_str(output.trim());
    }
    text.push_str(&footer(plan.len()));
    text
}

fn remaining(deadline: Option<Instant>, stage: &str) -> Result<Option<Duration>, OrchestratorError> {
    match deadline {
        None => Ok(None),
        Some(at) => {
            let now = Instant::now();
            if now >= at {
                Err(OrchestratorError::DeadlineExceeded {
                    stage: stage.to_string(),
                })
            } else {
                Ok(Some(at - now))
            }
        }
    }
}

pub struct ChunkOrchestrator {
    generator: Arc<dyn NarrativeGenerator>,
    planner: ChunkPlanner,
    prompts: PromptBuilder,
    config: PipelineConfig,
    generation_timeout: Duration,
}

impl ChunkOrchestrator {
    pub fn new(
        generator: Arc<dyn NarrativeGenerator>,
        config: PipelineConfig,
        generation_timeout: Duration,
    ) -> Self {
        let config = config.sanitized();
        Self {
            generator,
            planner: ChunkPlanner::default(),
            prompts: PromptBuilder::from_config(&config),
            config,
            generation_timeout,
        }
    }

    pub fn with_planner(mut self, planner: ChunkPlanner) -> Self {
        self.planner = planner;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub async fn run(
        &self,
        incident: &RcaIncident,
        base_prompt: &str,
    ) -> Result<NarrativeOutcome, OrchestratorError> {
        self.run_with_progress(incident, base_prompt, &NoopProgress, None)
            .await
    }

    /// Like [`run`](Self::run), reporting stages to `progress` and giving up
    /// once `deadline` passes. Every generator call is bounded by the smaller
    /// of the per-call timeout and the time left.
    pub async fn run_with_progress(
        &self,
        incident: &RcaIncident,
        base_prompt: &str,
        progress: &dyn ChunkProgress,
        deadline: Option<Instant>,
    ) -> Result<NarrativeOutcome, OrchestratorError> {
        progress.stage(0, 0, stage::CHUNK_PLANNING).await;
        let plan = self.planner.plan(incident, self.config.max_tokens_per_chunk);
        if plan.is_empty() {
            return Err(OrchestratorError::Planning("no chunks planned".to_string()));
        }
        let total = plan.len();
        progress.stage(0, total, stage::PROMPT_RENDERING).await;
        progress.stage(0, total, stage::CHUNKS_STARTED).await;

        let mut outputs: Vec<String> = Vec::with_capacity(total);
        let mut total_tokens = 0u64;
        let mut all_cached = true;
        let mut provider = self.generator.provider_name().to_string();
        let mut model = self.generator.model_name().to_string();

        for (i, chunk) in plan.iter().enumerate() {
            let chunk_number = i + 1;
            let processing = stage::chunk_processing(chunk_number);
            let call_timeout = remaining(deadline, &processing)?
                .map_or(self.generation_timeout, |left| left.min(self.generation_timeout));

            progress.stage(chunk_number, total, &processing).await;
            let prompt = self.prompts.build(
                base_prompt,
                chunk,
                chunk_number,
                total,
                outputs.last().map(String::as_str),
            );

            let generated = self
                .generator
                .generate(&prompt, call_timeout)
                .await
                .map_err(|source| {
                    error!(chunk_number, total_chunks = total, error = %source, "chunk generation failed");
                    OrchestratorError::ChunkFailed {
                        chunk: chunk_number,
                        total,
                        source,
                    }
                })?;

            debug!(
                chunk_number,
                total_chunks = total,
                tokens_used = generated.tokens_used,
                cached = generated.cached,
                "chunk generated"
            );
            total_tokens += generated.tokens_used;
            all_cached &= generated.cached;
            provider = generated.provider;
            model = generated.model;
            outputs.push(generated.text);

            progress
                .stage(chunk_number, total, &stage::chunk_completed(chunk_number))
                .await;
        }

        progress.stage(total, total, stage::STITCHING).await;
        let stitched = stitch(&plan, &outputs);

        let mut outcome = NarrativeOutcome {
            text: stitched,
            total_tokens,
            all_cached,
            chunk_count: total,
            synthesized: false,
            provider,
            model,
        };

        if total > 1 && self.config.synthesis_enabled {
            progress.stage(total, total, stage::SYNTHESIS).await;
            self.synthesize(base_prompt, &outputs, deadline, &mut outcome)
                .await;
        }

        info!(
            chunks = outcome.chunk_count,
            tokens_used = outcome.total_tokens,
            cached = outcome.all_cached,
            synthesized = outcome.synthesized,
            "narrative generated"
        );
        Ok(outcome)
    }

    async fn synthesize(
        &self,
        base_prompt: &str,
        outputs: &[String],
        deadline: Option<Instant>,
        outcome: &mut NarrativeOutcome,
    ) {
        let call_timeout = match remaining(deadline, stage::SYNTHESIS) {
            Ok(left) => left.map_or(self.generation_timeout, |l| l.min(self.generation_timeout)),
            Err(_) => {
                warn!("no time left for synthesis, keeping stitched narrative");
                return;
            }
        };

        let prompt = self
            .prompts
            .build_synthesis(base_prompt, outputs, self.config.synthesis_budget_tokens);

        match self.generator.generate(&prompt, call_timeout).await {
            Ok(generated) => {
                outcome.text = format!(
                    "{}\n\n{}{}",
                    NARRATIVE_TITLE,
                    generated.text.trim(),
                    footer(outcome.chunk_count)
                );
                outcome.total_tokens += generated.tokens_used;
                outcome.all_cached &= generated.cached;
                outcome.synthesized = true;
            }
            Err(err) => {
                warn!(error = %err, "synthesis failed, keeping stitched narrative");
            }
        }
    }
}
