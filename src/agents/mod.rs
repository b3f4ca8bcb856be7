//! Deterministic detector agents and the final verifier.

pub mod contradiction;
pub mod missing_info;
pub mod timeline;
pub mod verifier;

pub use contradiction::detect_contradictions;
pub use missing_info::detect_missing_info;
pub use timeline::{build_timeline, DEFAULT_MAX_ENTRIES};
pub use verifier::{verify_result, VerificationReport};

use crate::models::{Chart, ContradictionItem, MissingInfoItem, TimelineEntry};

/// Output of the three detector agents for one chart.
#[derive(Debug, Clone, Default)]
pub struct AgentOutputs {
    pub timeline: Vec<TimelineEntry>,
    pub missing_info: Vec<MissingInfoItem>,
    pub contradictions: Vec<ContradictionItem>,
}

/// Run timeline, missing-info and contradiction agents.
pub fn run_agents(chart: &Chart, max_timeline_entries: usize) -> AgentOutputs {
    let outputs = AgentOutputs {
        timeline: build_timeline(chart, max_timeline_entries),
        missing_info: detect_missing_info(chart),
        contradictions: detect_contradictions(chart),
    };
    tracing::info!(
        patient_id = %chart.patient_id,
        timeline = outputs.timeline.len(),
        missing_info = outputs.missing_info.len(),
        contradictions = outputs.contradictions.len(),
        "Detector agents complete"
    );
    outputs
}
