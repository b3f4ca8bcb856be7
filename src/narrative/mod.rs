//! Grounded narrative summaries.
//!
//! Two providers share one contract: [`DeterministicNarrative`] restates
//! snapshot lines, [`ModelNarrative`] asks a chat model and rejects any
//! reply that breaks the citation rules.

pub mod client;
pub mod deterministic;
pub mod grounded;
pub mod prompt;

pub use client::{ChatCompletionsClient, LlmClient, LlmError, MockLlmClient, RetryPolicy};
pub use deterministic::DeterministicNarrative;
pub use grounded::{validate_narrative, ModelNarrative};
pub use prompt::build_prompt;

use std::collections::BTreeMap;

use thiserror::Error;

use crate::models::NarrativeSummary;

/// Characters of raw model output kept on a contract violation.
pub const RAW_PREVIEW_LEN: usize = 800;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum NarrativeError {
    #[error("LLM returned non-JSON output: {detail}. Raw preview: {preview}")]
    InvalidJson { detail: String, preview: String },

    #[error("Follow-up questions must not include citation tags: {tags:?}. Raw preview: {preview}")]
    TaggedFollowups { tags: Vec<String>, preview: String },

    #[error("Missing citations for tags: {tags:?}. Raw preview: {preview}")]
    MissingCitationKeys { tags: Vec<String>, preview: String },

    #[error("Invalid citations: {invalid:?}. Raw preview: {preview}")]
    InvalidCitations {
        invalid: BTreeMap<String, Vec<String>>,
        preview: String,
    },

    #[error("Narrative backend error: {0}")]
    Llm(#[from] LlmError),
}

impl NarrativeError {
    /// The reply arrived but broke the grounding contract.
    pub fn is_contract_violation(&self) -> bool {
        !matches!(self, Self::Llm(_))
    }

    pub fn preview(&self) -> Option<&str> {
        match self {
            Self::InvalidJson { preview, .. }
            | Self::TaggedFollowups { preview, .. }
            | Self::MissingCitationKeys { preview, .. }
            | Self::InvalidCitations { preview, .. } => Some(preview),
            Self::Llm(_) => None,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Llm(e) if e.is_transient())
    }
}

/// A source of grounded narratives for one snapshot.
pub trait NarrativeProvider: Send + Sync {
    fn name(&self) -> &'static str;

    fn generate(&self, snapshot: &str, patient_id: &str) -> Result<NarrativeSummary, NarrativeError>;
}
