//! Per-submission knobs for the narrative pipeline.

use serde::{Deserialize, Serialize};

use crate::{lookup_flag, lookup_or, lookup_string};

/// Everything the narrative pipeline is allowed to vary on.
///
/// Built once (usually from [`PipelineConfig::from_lookup`]) and handed to the
/// task manager with each submission, so a run never reads ambient state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineConfig {
    /// Soft token ceiling per chunk prompt.
    pub max_tokens_per_chunk: usize,
    /// Characters of the previous chunk's output carried into the next prompt.
    pub context_excerpt_chars: usize,
    /// Run the merge pass when more than one chunk was generated.
    pub synthesis_enabled: bool,
    /// Token ceiling for the merge prompt before excerpts are truncated.
    pub synthesis_budget_tokens: usize,
    /// Base prompt template; `None` selects the built-in one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_template: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_tokens_per_chunk: 3000,
            context_excerpt_chars: 1200,
            synthesis_enabled: true,
            synthesis_budget_tokens: 6000,
            prompt_template: None,
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(&crate::env_lookup)
    }

    pub fn from_lookup<F>(lookup: &F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let config = Self {
            max_tokens_per_chunk: lookup_or(
                lookup,
                "NARRATIVE_MAX_TOKENS_PER_CHUNK",
                defaults.max_tokens_per_chunk,
            ),
            context_excerpt_chars: lookup_or(
                lookup,
                "NARRATIVE_CONTEXT_EXCERPT_CHARS",
                defaults.context_excerpt_chars,
            ),
            synthesis_enabled: lookup_flag(
                lookup,
                "NARRATIVE_SYNTHESIS_ENABLED",
                defaults.synthesis_enabled,
            ),
            synthesis_budget_tokens: lookup_or(
                lookup,
                "NARRATIVE_SYNTHESIS_BUDGET_TOKENS",
                defaults.synthesis_budget_tokens,
            ),
            prompt_template: lookup_string(lookup, "NARRATIVE_PROMPT_TEMPLATE"),
        };
        config.sanitized()
    }

    /// Replace zero budgets with defaults and keep the synthesis budget at
    /// least as large as the per-chunk one.
    pub fn sanitized(mut self) -> Self {
        let defaults = Self::default();
        if self.max_tokens_per_chunk == 0 {
            log::warn!("max_tokens_per_chunk must be positive, using default");
            self.max_tokens_per_chunk = defaults.max_tokens_per_chunk;
        }
        if self.context_excerpt_chars == 0 {
            self.context_excerpt_chars = defaults.context_excerpt_chars;
        }
        if self.synthesis_budget_tokens < self.max_tokens_per_chunk {
            log::warn!(
                "synthesis budget {} is below the chunk budget {}, raising it",
                self.synthesis_budget_tokens,
                self.max_tokens_per_chunk
            );
            self.synthesis_budget_tokens = self.max_tokens_per_chunk;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn reads_overrides() {
        let vars: HashMap<&str, &str> = [
            ("NARRATIVE_MAX_TOKENS_PER_CHUNK", "2000"),
            ("NARRATIVE_SYNTHESIS_ENABLED", "false"),
            ("NARRATIVE_PROMPT_TEMPLATE", "Explain {{ImpactService}}"),
        ]
        .into_iter()
        .collect();
        let config = PipelineConfig::from_lookup(&|name: &str| vars.get(name).map(|v| v.to_string()));

        assert_eq!(config.max_tokens_per_chunk, 2000);
        assert!(!config.synthesis_enabled);
        assert_eq!(config.context_excerpt_chars, 1200);
        assert_eq!(config.prompt_template.as_deref(), Some("Explain {{ImpactService}}"));
    }

    #[test]
    fn sanitizes_budgets() {
        let config = PipelineConfig {
            max_tokens_per_chunk: 0,
            synthesis_budget_tokens: 100,
            ..PipelineConfig::default()
        }
        .sanitized();

        assert_eq!(config.max_tokens_per_chunk, 3000);
        assert_eq!(config.synthesis_budget_tokens, 3000);
    }
}
