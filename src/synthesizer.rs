//! Response synthesizer
//!
//! Merges responder outcomes into one narrative in fixed priority order,
//! consolidates citations and computes the reported confidence.

use crate::config::{OrchestratorConfig, DEFAULT_CONFIDENCE, DEFAULT_MAX_CITATIONS};
use crate::error::OrchestrationError;
use crate::models::{
    Citation, ResponderId, ResponderOutcome, ResponderResults, ResponseSection, Synthesis,
};
use crate::Result;
use std::collections::HashSet;
use tracing::{debug, warn};

pub const GENERAL_DISCLAIMER: &str = "⚠️ **GENERAL DISCLAIMER**: Not financial advice. \
Consult a qualified financial advisor before making investment decisions.";

pub const TAX_DISCLAIMER: &str = "⚠️ **TAX DISCLAIMER**: This is educational information only, \
not tax advice. Consult a qualified tax professional for your specific situation.";

pub const PLANNING_DISCLAIMER: &str = "⚠️ **PLANNING DISCLAIMER**: These projections are estimates \
based on assumptions. Actual results may vary significantly based on market conditions and changes.";

pub const NO_ANSWER_MESSAGE: &str = "I was unable to generate a response for your query. \
Please try rephrasing or provide more specific information.";

#[derive(Debug, Clone)]
pub struct SynthesizerConfig {
    pub max_citations: usize,
    /// Reported when a responder succeeds without its own confidence
    pub default_confidence: f32,
}

impl Default for SynthesizerConfig {
    fn default() -> Self {
        Self {
            max_citations: DEFAULT_MAX_CITATIONS,
            default_confidence: DEFAULT_CONFIDENCE,
        }
    }
}

impl From<&OrchestratorConfig> for SynthesizerConfig {
    fn from(config: &OrchestratorConfig) -> Self {
        Self {
            max_citations: config.max_citations,
            default_confidence: config.default_confidence,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ResponseSynthesizer {
    config: SynthesizerConfig,
}

impl ResponseSynthesizer {
    pub fn new(config: SynthesizerConfig) -> Self {
        Self { config }
    }

    /// Merge `results` following `order`.
    ///
    /// Every id in `order` must have an entry in `results`; a missing one is
    /// reported as state corruption.
    pub fn synthesize(&self, results: &ResponderResults, order: &[ResponderId]) -> Result<Synthesis> {
        let mut sections: Vec<ResponseSection> = Vec::new();
        let mut citations: Vec<Citation> = Vec::new();
        let mut seen_citations: HashSet<String> = HashSet::new();
        let mut confidence: Option<f32> = None;

        for id in order {
            let outcome = results.get(id).ok_or_else(|| {
                OrchestrationError::StateCorruption(format!("no result recorded for responder {}", id))
            })?;

            let ResponderOutcome::Success {
                answer_text,
                citations: answer_citations,
                confidence: answer_confidence,
                ..
            } = outcome
            else {
                continue;
            };

            let reported = answer_confidence
                .unwrap_or(self.config.default_confidence)
                .clamp(0.0, 1.0);
            confidence = Some(confidence.map_or(reported, |c| c.max(reported)));

            for citation in answer_citations {
                if citations.len() >= self.config.max_citations {
                    break;
                }
                if seen_citations.insert(citation.identity().to_string()) {
                    citations.push(citation.clone());
                }
            }

            let body = answer_text.trim();
            if body.is_empty() {
                warn!(responder = %id, "Responder succeeded with an empty answer");
                continue;
            }
            sections.push(ResponseSection {
                responder: *id,
                title: id.section_title().to_string(),
                body: body.to_string(),
            });
        }

        let Some(confidence) = confidence.filter(|_| !sections.is_empty()) else {
            debug!(selected = order.len(), "No usable responder output; emitting apology");
            return Ok(Synthesis {
                final_response: format!("{}\n\n{}", NO_ANSWER_MESSAGE, GENERAL_DISCLAIMER),
                final_citations: Vec::new(),
                confidence: 0.0,
                sections: Vec::new(),
            });
        };

        let mut paragraphs: Vec<String> = sections
            .iter()
            .enumerate()
            .map(|(i, section)| {
                if i == 0 {
                    section.body.clone()
                } else {
                    format!("**{}:**\n{}", section.title, section.body)
                }
            })
            .collect();

        let contributed = |id: ResponderId| sections.iter().any(|s| s.responder == id);
        if contributed(ResponderId::TaxEducation) {
            paragraphs.push(TAX_DISCLAIMER.to_string());
        }
        if contributed(ResponderId::GoalPlanning) {
            paragraphs.push(PLANNING_DISCLAIMER.to_string());
        }
        paragraphs.push(GENERAL_DISCLAIMER.to_string());

        debug!(
            sections = sections.len(),
            citations = citations.len(),
            confidence,
            "Synthesis complete"
        );

        Ok(Synthesis {
            final_response: paragraphs.join("\n\n"),
            final_citations: citations,
            confidence,
            sections,
        })
    }
}
