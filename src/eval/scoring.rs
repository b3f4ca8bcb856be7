//! Set-based precision/recall and citation coverage for one analysis result.

use std::collections::BTreeSet;

use serde::Serialize;

use super::manifest::Expects;
use crate::evidence_tracker::EvidencePool;
use crate::models::{AnalysisResult, Evidence, NarrativeSummary};

/// Headline metrics, in gate and summary-table order.
pub const METRIC_KEYS: [&str; 10] = [
    "risk_precision",
    "risk_recall",
    "missing_precision",
    "missing_recall",
    "contradiction_precision",
    "contradiction_recall",
    "narrative_citation_coverage",
    "risk_evidence_coverage",
    "timeline_evidence_coverage",
    "contradiction_evidence_coverage",
];

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CategoryScore {
    pub expected: Vec<String>,
    pub actual: Vec<String>,
    pub tp: usize,
    pub fp: usize,
    #[serde(rename = "fn")]
    pub fn_: usize,
    pub precision: f64,
    pub recall: f64,
    /// Extra detections were not allowed and at least one occurred.
    pub strict_fail: bool,
}

impl CategoryScore {
    pub fn score(actual: &BTreeSet<String>, expected: &BTreeSet<String>, allow_extra: bool) -> Self {
        let tp = actual.intersection(expected).count();
        let fp = actual.difference(expected).count();
        let fn_ = expected.difference(actual).count();

        let predicted = tp + fp;
        let mut precision = if predicted == 0 {
            if expected.is_empty() {
                1.0
            } else {
                0.0
            }
        } else {
            tp as f64 / predicted as f64
        };
        let recall = if expected.is_empty() {
            1.0
        } else {
            tp as f64 / (tp + fn_) as f64
        };

        let strict_fail = !allow_extra && fp > 0;
        if strict_fail {
            precision = 0.0;
        }

        Self {
            expected: expected.iter().cloned().collect(),
            actual: actual.iter().cloned().collect(),
            tp,
            fp,
            fn_,
            precision,
            recall,
            strict_fail,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PatientMetrics {
    pub risks: CategoryScore,
    pub missing_info: CategoryScore,
    pub contradictions: CategoryScore,
    pub narrative_citation_coverage: f64,
    pub risk_evidence_coverage: f64,
    pub timeline_evidence_coverage: f64,
    pub contradiction_evidence_coverage: f64,
}

impl PatientMetrics {
    /// Values for [`METRIC_KEYS`], in order.
    pub fn values(&self) -> [f64; 10] {
        [
            self.risks.precision,
            self.risks.recall,
            self.missing_info.precision,
            self.missing_info.recall,
            self.contradictions.precision,
            self.contradictions.recall,
            self.narrative_citation_coverage,
            self.risk_evidence_coverage,
            self.timeline_evidence_coverage,
            self.contradiction_evidence_coverage,
        ]
    }
}

fn ids<'a>(values: impl Iterator<Item = &'a str>) -> BTreeSet<String> {
    values.filter(|v| !v.trim().is_empty()).map(str::to_string).collect()
}

/// Share of items with at least one evidence pointer; 1.0 when empty.
pub fn evidence_coverage<'a>(items: impl Iterator<Item = &'a [Evidence]>) -> f64 {
    let (mut total, mut covered) = (0usize, 0usize);
    for evidence in items {
        total += 1;
        if !evidence.is_empty() {
            covered += 1;
        }
    }
    if total == 0 {
        1.0
    } else {
        covered as f64 / total as f64
    }
}

/// Share of citation keys with at least one value in `pool`; 1.0 when
/// there is no narrative or it has no keys.
pub fn narrative_citation_coverage(narrative: Option<&NarrativeSummary>, pool: &EvidencePool) -> f64 {
    let Some(narrative) = narrative else {
        return 1.0;
    };
    if narrative.citations.is_empty() {
        return 1.0;
    }
    let covered = narrative
        .citations
        .values()
        .filter(|values| values.iter().any(|v| pool.contains(v)))
        .count();
    covered as f64 / narrative.citations.len() as f64
}

pub fn score_result(result: &AnalysisResult, expects: &Expects) -> PatientMetrics {
    let actual_risks = ids(result.risks.iter().map(|r| r.rule_id.as_str()));
    let actual_missing = ids(result.missing_info.iter().flatten().map(|m| m.id.as_str()));
    let actual_contradictions = ids(result.contradictions.iter().flatten().map(|c| c.id.as_str()));

    let pool = EvidencePool::from_result(result);

    PatientMetrics {
        risks: CategoryScore::score(&actual_risks, &expects.risk_ids(), expects.allows_extra_risks()),
        missing_info: CategoryScore::score(
            &actual_missing,
            &expects.missing_info_ids(),
            expects.allows_extra_missing_info(),
        ),
        contradictions: CategoryScore::score(
            &actual_contradictions,
            &expects.contradiction_ids(),
            expects.allows_extra_contradictions(),
        ),
        narrative_citation_coverage: narrative_citation_coverage(result.narrative.as_ref(), &pool),
        risk_evidence_coverage: evidence_coverage(result.risks.iter().map(|r| r.evidence.as_slice())),
        timeline_evidence_coverage: evidence_coverage(
            result.timeline.iter().flatten().map(|t| t.evidence.as_slice()),
        ),
        contradiction_evidence_coverage: evidence_coverage(
            result.contradictions.iter().flatten().map(|c| c.evidence.as_slice()),
        ),
    }
}
