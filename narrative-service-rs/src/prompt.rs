//! Prompt rendering for chunk and synthesis calls.

use std::collections::BTreeMap;

use config_rs::PipelineConfig;
use once_cell::sync::Lazy;
use rca_model::RcaIncident;
use regex::{Captures, Regex};
use tracing::{debug, info, warn};

use crate::chunking::Chunk;

/// Built-in base prompt. Placeholders use `{{Name}}`.
pub const DEFAULT_BASE_TEMPLATE: &str = "You are a site reliability engineer writing a root cause \
analysis for an incident on {{ImpactService}} (metric {{MetricName}}, severity {{Severity}}) \
between {{TimeWindowStart}} and {{TimeWindowEnd}}.\n\
Reported impact: {{ImpactSummary}}\n\
Most likely root cause: {{RootCauseService}} {{RootCauseComponent}}, from {{ChainCount}} causal \
chain(s); the strongest chain scores {{TopChainScore}} along {{TopChainPath}}.\n\
Write for an on-call engineer: plain language, no raw identifiers.";

static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z][A-Za-z0-9_]*)\s*\}\}").expect("placeholder pattern")
});

/// Rough token count: one token per four characters.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Values available to base prompt templates.
pub fn template_values(incident: &RcaIncident) -> BTreeMap<&'static str, String> {
    let impact = &incident.impact;
    let top = incident.top_chain();
    let root = incident.root_cause.as_ref();

    let mut values = BTreeMap::new();
    values.insert("ImpactService", impact.impact_service.display.clone());
    values.insert("MetricName", impact.metric_name.display.clone());
    values.insert("Severity", format!("{:.2}", impact.severity));
    values.insert("ImpactSummary", impact.summary.clone());
    values.insert("TimeWindowStart", impact.window.start.to_rfc3339());
    values.insert("TimeWindowEnd", impact.window.end.to_rfc3339());
    values.insert(
        "RootCauseService",
        root.map(|s| s.service.display.clone())
            .unwrap_or_else(|| "unknown".to_string()),
    );
    values.insert(
        "RootCauseComponent",
        root.map(|s| s.component.display.clone()).unwrap_or_default(),
    );
    values.insert("ChainCount", incident.chains.len().to_string());
    values.insert(
        "TopChainScore",
        top.map(|c| format!("{:.2}", c.score))
            .unwrap_or_else(|| "n/a".to_string()),
    );
    values.insert(
        "TopChainPath",
        top.map(|c| c.impact_path.join(" -> "))
            .unwrap_or_else(|| "n/a".to_string()),
    );
    values
}

/// Fill `{{Name}}` placeholders from the incident. Unknown names render empty.
pub fn render_base_prompt(template: &str, incident: &RcaIncident) -> String {
    let values = template_values(incident);
    PLACEHOLDER
        .replace_all(template, |caps: &Captures| match values.get(&caps[1]) {
            Some(value) => value.clone(),
            None => {
                warn!(placeholder = &caps[1], "unknown prompt placeholder");
                String::new()
            }
        })
        .trim()
        .to_string()
}

/// Last `max_chars` characters of `text`, marked when cut.
pub fn tail_excerpt(text: &str, max_chars: usize) -> String {
    let text = text.trim();
    let count = text.chars().count();
    if count <= max_chars {
        return text.to_string();
    }
    let skip = count - max_chars;
    format!("...{}", text.chars().skip(skip).collect::<String>())
}

/// First `max_chars` characters of `text`, marked when cut.
pub fn head_excerpt(text: &str, max_chars: usize) -> String {
    let text = text.trim();
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    format!("{}...", text.chars().take(max_chars).collect::<String>())
}

fn instructions(chunk: &Chunk) -> &'static [&'static str] {
    match chunk {
        Chunk::Summary(_) => &[
            "Describe the user-visible impact first: which service and metric degraded, how badly, and when.",
            "Then explain the most likely root cause in plain language and how strongly the analysis supports it.",
            "Use the time rings to say how long before the peak the cause first appeared.",
            "Do not list raw identifiers or JSON field names.",
        ],
        Chunk::ChainGroup(_) => &[
            "Take the chains in rank order.",
            "For each chain, walk the why-chain from whyIndex 1 to its deepest step.",
            "For each step, name the service, say what happened, and place it in its time ring.",
            "Point out services or causes shared with chains described in earlier parts.",
            "Do not repeat the impact description.",
        ],
    }
}

/// Renders self-contained prompts for each chunk and for the merge pass.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    max_tokens_per_chunk: usize,
    context_excerpt_chars: usize,
}

impl PromptBuilder {
    pub fn new(max_tokens_per_chunk: usize, context_excerpt_chars: usize) -> Self {
        Self {
            max_tokens_per_chunk,
            context_excerpt_chars,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.max_tokens_per_chunk, config.context_excerpt_chars)
    }

    /// `chunk_number` is 1-based. `prior_output` is the previous chunk's own
    /// generated text; only a bounded tail of it is included.
    pub fn build(
        &self,
        base_prompt: &str,
        chunk: &Chunk,
        chunk_number: usize,
        total_chunks: usize,
        prior_output: Option<&str>,
    ) -> String {
        let mut prompt = String::new();
        if !base_prompt.trim().is_empty() {
            prompt.push_str(base_prompt.trim());
            prompt.push_str("\n\n");
        }

        if chunk_number <= 1 {
            if total_chunks > 1 {
                prompt.push_str(&format!(
                    "This is part 1 of {} of the analysis. Be concise; later parts cover the causal chains in detail.\n",
                    total_chunks
                ));
            } else {
                prompt.push_str("This is part 1 of 1 of the analysis. Be concise.\n");
            }
            if let Chunk::Summary(summary) = chunk {
                if let Some(rings) = &summary.time_rings {
                    prompt.push_str(&format!("Incident peak: {}.\nTime rings:\n", rings.peak_time.to_rfc3339()));
                    for ring in &rings.rings {
                        prompt.push_str(&format!("- {} ({}): {}\n", ring.ring, ring.window, ring.description));
                    }
                }
            }
        } else {
            prompt.push_str(&format!(
                "Continuing the analysis: part {} of {}.\n",
                chunk_number, total_chunks
            ));
            if let Some(prior) = prior_output.filter(|p| !p.trim().is_empty()) {
                prompt.push_str("The previous part ended with:\n\"\"\"\n");
                prompt.push_str(&tail_excerpt(prior, self.context_excerpt_chars));
                prompt.push_str("\n\"\"\"\nContinue from there without repeating it.\n");
            }
        }

        prompt.push_str(&format!("\nData ({}):\n{}\n\nInstructions:\n", chunk.label(), chunk.to_json()));
        for (i, line) in instructions(chunk).iter().enumerate() {
            prompt.push_str(&format!("{}. {}\n", i + 1, line));
        }

        let estimate = estimate_tokens(&prompt);
        if estimate > self.max_tokens_per_chunk {
            warn!(
                chunk_number,
                total_chunks,
                estimated_tokens = estimate,
                max_tokens = self.max_tokens_per_chunk,
                "chunk prompt exceeds the soft token budget"
            );
        } else {
            debug!(chunk_number, estimated_tokens = estimate, "chunk prompt built");
        }
        prompt
    }

    /// Merge prompt over all chunk outputs, led by `base_prompt` when one is
    /// given. When the whole prompt would exceed `budget_tokens`, every part
    /// keeps the same fraction of its text so the budget left after the fixed
    /// framing is shared in proportion to part length.
    pub fn build_synthesis(
        &self,
        base_prompt: &str,
        outputs: &[String],
        budget_tokens: usize,
    ) -> String {
        let mut header = String::new();
        if !base_prompt.trim().is_empty() {
            header.push_str(base_prompt.trim());
            header.push_str("\n\n");
        }
        header.push_str(&format!(
            "You wrote the following {} parts of one root cause analysis separately. \
Merge them into a single coherent report. Keep every concrete finding: services, components, \
scores, time rings and the causal order. Remove repetition and keep headings minimal.\n",
            outputs.len()
        ));
        let render = |parts: &[String]| {
            let mut text = header.clone();
            for (i, part) in parts.iter().enumerate() {
                text.push_str(&format!("\n### Part {}\n{}\n", i + 1, part.trim()));
            }
            text
        };

        let full = render(outputs);
        let estimate = estimate_tokens(&full);
        if estimate <= budget_tokens || outputs.is_empty() {
            return full;
        }

        let blanks = vec![String::new(); outputs.len()];
        let overhead = estimate_tokens(&render(blanks.as_slice()));
        let available_chars = budget_tokens.saturating_sub(overhead).saturating_mul(4);
        let lengths: Vec<usize> = outputs.iter().map(|p| p.trim().chars().count()).collect();
        let total_chars: usize = lengths.iter().sum();
        let cut: Vec<String> = outputs
            .iter()
            .zip(&lengths)
            .map(|(part, len)| {
                let keep =
                    (*len as u128 * available_chars as u128 / total_chars.max(1) as u128) as usize;
                truncate_to(part, keep)
            })
            .collect();
        info!(
            estimated_tokens = estimate,
            budget_tokens,
            overhead_tokens = overhead,
            kept_fraction = available_chars as f64 / total_chars.max(1) as f64,
            "synthesis prompt over budget, truncating chunk outputs"
        );
        render(cut.as_slice())
    }
}

/// At most `max_chars` characters of `text`, including the cut marker.
fn truncate_to(text: &str, max_chars: usize) -> String {
    let text = text.trim();
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    match max_chars.checked_sub(3) {
        Some(keep) if keep > 0 => head_excerpt(text, keep),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::plan;
    use crate::tests::fixtures::incident_with_chains;

    fn builder() -> PromptBuilder {
        PromptBuilder::new(3000, 40)
    }

    #[test]
    fn estimates_a_token_per_four_chars() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn first_chunk_is_framed_as_part_one() {
        let incident = incident_with_chains(3);
        let plan = plan(&incident, 3000);
        let prompt = builder().build("BASE", &plan.chunks()[0], 1, plan.len(), None);

        assert!(prompt.starts_with("BASE\n\nThis is part 1 of 2"));
        assert!(prompt.contains("Be concise"));
        assert!(prompt.contains("Incident peak: "));
        assert!(prompt.contains("R1_IMMEDIATE (T-5s to T-0s)"));
        assert!(prompt.contains("Instructions:\n1. Describe the user-visible impact"));
    }

    #[test]
    fn later_chunks_carry_a_bounded_excerpt() {
        let incident = incident_with_chains(3);
        let plan = plan(&incident, 3000);
        let prior = format!("{}THE END OF PART ONE", "x".repeat(500));
        let prompt = builder().build("BASE", &plan.chunks()[1], 2, 2, Some(&prior));

        assert!(prompt.contains("Continuing the analysis: part 2 of 2."));
        assert!(prompt.contains("THE END OF PART ONE"));
        assert!(!prompt.contains(&"x".repeat(100)));
        assert!(prompt.contains("walk the why-chain from whyIndex 1"));
    }

    #[test]
    fn over_budget_prompts_are_still_built() {
        let incident = incident_with_chains(5);
        let plan = plan(&incident, 10);
        let prompt = PromptBuilder::new(10, 40).build("", &plan.chunks()[1], 2, 2, None);
        assert!(estimate_tokens(&prompt) > 10);
        assert!(prompt.starts_with("Continuing"));
    }

    #[test]
    fn excerpts_respect_char_boundaries() {
        assert_eq!(tail_excerpt("héllo wörld", 5), "...wörld");
        assert_eq!(head_excerpt("héllo wörld", 5), "héllo...");
        assert_eq!(tail_excerpt("short", 50), "short");
    }

    #[test]
    fn renders_base_template_placeholders() {
        let incident = incident_with_chains(2);
        let text = render_base_prompt(
            "{{ImpactService}}/{{ MetricName }} root={{RootCauseService}} chains={{ChainCount}} {{Nope}}!",
            &incident,
        );
        assert_eq!(text, "checkout/p99_latency root=db-2 chains=2 !");

        let default = render_base_prompt(DEFAULT_BASE_TEMPLATE, &incident);
        assert!(default.contains("checkout"));
        assert!(!default.contains("{{"));
    }

    #[test]
    fn synthesis_truncates_parts_proportionally() {
        let outputs = vec!["a".repeat(4000), "b".repeat(4000), "c".repeat(4000)];
        let prompt = builder().build_synthesis("", &outputs, 1500);

        assert!(estimate_tokens(&prompt) <= 1500);
        let parts: Vec<usize> = prompt.split("### Part ").skip(1).map(str::len).collect();
        assert_eq!(parts.len(), 3);
        let (min, max) = (*parts.iter().min().unwrap(), *parts.iter().max().unwrap());
        assert!(max - min <= 1);
        assert!(max < 2000 && min > 1000);
        assert!(prompt.contains(&"c".repeat(1000)));
    }

    #[test]
    fn synthesis_cuts_uneven_parts_by_the_same_fraction() {
        let outputs = vec!["x".repeat(400), "z".repeat(20000)];
        let budget = 3000;
        let prompt = builder().build_synthesis("", &outputs, budget);

        let estimate = estimate_tokens(&prompt);
        assert!(estimate <= budget);
        assert!(estimate > budget * 9 / 10, "only {} of {} tokens used", estimate, budget);

        let short_kept = prompt.chars().filter(|c| *c == 'x').count() as f64 / 400.0;
        let long_kept = prompt.chars().filter(|c| *c == 'z').count() as f64 / 20000.0;
        assert!(long_kept > 0.5, "long part kept {:.2}", long_kept);
        assert!((short_kept - long_kept).abs() < 0.02, "{:.3} vs {:.3}", short_kept, long_kept);
    }

    #[test]
    fn synthesis_budget_covers_the_base_prompt() {
        let base = "Context for the whole incident. ".repeat(200);
        let outputs = vec!["x".repeat(6000), "z".repeat(6000)];
        let prompt = builder().build_synthesis(&base, &outputs, 3000);

        assert!(prompt.starts_with("Context for the whole incident."));
        assert!(estimate_tokens(&prompt) <= 3000);
        assert!(prompt.contains("### Part 2\nzzz"));
    }

    #[test]
    fn synthesis_under_budget_keeps_everything() {
        let outputs = vec!["first part".to_string(), "second part".to_string()];
        let prompt = builder().build_synthesis("", &outputs, 6000);
        assert!(prompt.contains("### Part 1\nfirst part"));
        assert!(prompt.contains("### Part 2\nsecond part"));
    }
}
