//! Final trust filter over an analysis result.
//!
//! Artifacts that cannot be proven against the result's own evidence, or
//! that are structurally incomplete, are dropped. Nothing is repaired and
//! nothing is raised.

use crate::evidence_tracker::EvidencePool;
use crate::models::{AnalysisResult, ContradictionItem, NarrativeSummary};

/// What the verifier removed, for logging and reporting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerificationReport {
    pub narrative_dropped: bool,
    pub contradictions_dropped: usize,
    pub timeline_dropped: usize,
    pub missing_info_dropped: usize,
}

impl VerificationReport {
    pub fn is_clean(&self) -> bool {
        *self == Self::default()
    }
}

/// First citation value that is not backed by the pool, if any.
pub fn ungrounded_citation<'a>(narrative: &'a NarrativeSummary, pool: &EvidencePool) -> Option<&'a str> {
    narrative.cited_doc_ids().find(|doc_id| !pool.contains(doc_id))
}

fn retain_counting<T>(items: &mut Option<Vec<T>>, keep: impl Fn(&T) -> bool) -> usize {
    match items {
        Some(list) => {
            let before = list.len();
            list.retain(|item| keep(item));
            before - list.len()
        }
        None => 0,
    }
}

/// Filter `result` in place against its own evidence pool.
pub fn verify_result(result: &mut AnalysisResult) -> VerificationReport {
    let pool = EvidencePool::from_result(result);
    let mut report = VerificationReport::default();

    let ungrounded = result
        .narrative
        .as_ref()
        .and_then(|n| ungrounded_citation(n, &pool))
        .map(str::to_string);
    if let Some(doc_id) = ungrounded {
        tracing::warn!(doc_id = %doc_id, pool = pool.len(), "Narrative cites unknown evidence, dropping narrative");
        result.narrative = None;
        report.narrative_dropped = true;
    }

    report.contradictions_dropped = retain_counting(&mut result.contradictions, |c| {
        c.evidence.len() >= ContradictionItem::MIN_EVIDENCE
    });
    report.timeline_dropped = retain_counting(&mut result.timeline, |e| e.is_complete());
    report.missing_info_dropped = retain_counting(&mut result.missing_info, |m| m.is_complete());

    if !report.is_clean() {
        tracing::warn!(
            narrative_dropped = report.narrative_dropped,
            contradictions = report.contradictions_dropped,
            timeline = report.timeline_dropped,
            missing_info = report.missing_info_dropped,
            "Verifier dropped artifacts"
        );
    }
    report
}
