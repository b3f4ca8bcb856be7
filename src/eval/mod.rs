//! Manifest-driven evaluation harness.
//!
//! Runs the analysis pipeline per manifest patient, scores the output
//! against seeded expectations and applies threshold gates.

pub mod gates;
pub mod manifest;
pub mod report;
pub mod runner;
pub mod scoring;

pub use gates::{evaluate_gates, GateOutcome};
pub use manifest::{load_manifest, Expects, Gates, Manifest, PatientCase};
pub use report::{JsonPayload, LlmOutcome, ModeReport, PatientReport};
pub use runner::{EvalOptions, EvalRunner};
pub use scoring::{score_result, CategoryScore, PatientMetrics};

use thiserror::Error;

use crate::analysis::PipelineError;
use crate::models::{ChartError, ModelError};

#[derive(Error, Debug)]
pub enum EvalError {
    #[error("Cannot read manifest {path}: {source}")]
    ManifestIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid manifest {path}: {source}")]
    ManifestJson {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    InvalidMode(#[from] ModelError),

    #[error(transparent)]
    Chart(#[from] ChartError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("LLM evaluation timed out after {0}s")]
    Timeout(u64),

    #[error("Evaluation worker exited without a result")]
    WorkerDisconnected,
}

impl EvalError {
    /// Timeouts and transient backend failures are worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout(_) => true,
            Self::Pipeline(e) => e.is_transient(),
            _ => false,
        }
    }

    /// Short type name used in `llm failed: <kind>` reasons.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ManifestIo { .. } | Self::ManifestJson { .. } => "ManifestError",
            Self::InvalidMode(_) => "InvalidMode",
            Self::Chart(_) => "ChartError",
            Self::Pipeline(e) => e.kind(),
            Self::Timeout(_) => "TimeoutError",
            Self::WorkerDisconnected => "WorkerDisconnected",
        }
    }
}
