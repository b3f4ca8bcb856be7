//! Evidence bookkeeping over a finished [`AnalysisResult`].
//!
//! Collects every provenance pointer the result carries into one pool (the
//! set of doc ids a narrative may cite) and back-fills file path and
//! timestamp on pointers that have not been enriched yet.

use std::collections::{BTreeSet, HashMap};

use chrono::NaiveDateTime;

use crate::models::{AnalysisResult, Chart, Evidence};

/// Every pointer in the result, in a stable order: snapshot, risks,
/// timeline, missing-info, contradictions.
pub fn collect_result_evidence(result: &AnalysisResult) -> Vec<&Evidence> {
    let risks = result.risks.iter().flat_map(|r| r.evidence.iter());
    let timeline = result.timeline.iter().flatten().flat_map(|e| e.evidence.iter());
    let missing = result.missing_info.iter().flatten().flat_map(|m| m.evidence.iter());
    let contradictions = result
        .contradictions
        .iter()
        .flatten()
        .flat_map(|c| c.evidence.iter());

    result
        .snapshot_evidence
        .iter()
        .chain(risks)
        .chain(timeline)
        .chain(missing)
        .chain(contradictions)
        .collect()
}

fn result_evidence_mut(result: &mut AnalysisResult) -> impl Iterator<Item = &mut Evidence> {
    let risks = result.risks.iter_mut().flat_map(|r| r.evidence.iter_mut());
    let timeline = result
        .timeline
        .iter_mut()
        .flatten()
        .flat_map(|e| e.evidence.iter_mut());
    let missing = result
        .missing_info
        .iter_mut()
        .flatten()
        .flat_map(|m| m.evidence.iter_mut());
    let contradictions = result
        .contradictions
        .iter_mut()
        .flatten()
        .flat_map(|c| c.evidence.iter_mut());

    result
        .snapshot_evidence
        .iter_mut()
        .chain(risks)
        .chain(timeline)
        .chain(missing)
        .chain(contradictions)
}

/// Doc ids a narrative citation may legitimately reference.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvidencePool {
    doc_ids: BTreeSet<String>,
}

impl EvidencePool {
    pub fn from_result(result: &AnalysisResult) -> Self {
        Self::from_evidence(collect_result_evidence(result))
    }

    pub fn from_evidence<'a, I>(evidence: I) -> Self
    where
        I: IntoIterator<Item = &'a Evidence>,
    {
        let doc_ids = evidence
            .into_iter()
            .map(|e| e.doc_id().trim())
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .collect();
        Self { doc_ids }
    }

    pub fn contains(&self, doc_id: &str) -> bool {
        self.doc_ids.contains(doc_id)
    }

    pub fn len(&self) -> usize {
        self.doc_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.doc_ids.is_empty()
    }

    pub fn doc_ids(&self) -> impl Iterator<Item = &str> {
        self.doc_ids.iter().map(String::as_str)
    }
}

/// Observation effective dates keyed by observation id.
fn observation_dates(chart: &Chart) -> HashMap<&str, NaiveDateTime> {
    chart
        .observations
        .iter()
        .filter(|o| !o.id.is_empty())
        .filter_map(|o| o.effective.map(|d| (o.id.as_str(), d)))
        .collect()
}

/// Attach `source_path` and observation timestamps to pointers that lack a
/// file path. Pointers that already carry one are left untouched, so
/// repeated calls change nothing. Returns how many pointers were enriched.
pub fn enrich_result_evidence(result: &mut AnalysisResult, chart: &Chart, source_path: &str) -> usize {
    let dates = observation_dates(chart);
    let mut enriched = 0;

    for evidence in result_evidence_mut(result) {
        if evidence.file_path().is_some() {
            continue;
        }
        evidence.attach_file_path(source_path);
        if evidence.resource_type() == Some("Observation") {
            let date = evidence.resource_id().and_then(|id| dates.get(id)).copied();
            if let Some(date) = date {
                evidence.attach_timestamp(date);
            }
        }
        enriched += 1;
    }

    tracing::debug!(patient_id = %chart.patient_id, enriched, "Evidence enriched");
    enriched
}
