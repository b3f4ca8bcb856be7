use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::enums::Severity;
use super::evidence::Evidence;

/// A clinical risk surfaced by the rule engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskFinding {
    pub rule_id: String,
    pub severity: Severity,
    pub message: String,
    pub evidence: Vec<Evidence>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub date: String,
    #[serde(rename = "type")]
    pub entry_type: String,
    pub summary: String,
    pub evidence: Vec<Evidence>,
}

impl TimelineEntry {
    /// Build an entry; refuses blank fields or an empty evidence list.
    pub fn new(date: &str, entry_type: &str, summary: &str, evidence: Vec<Evidence>) -> Option<Self> {
        if evidence.is_empty() || is_blank(date) || is_blank(entry_type) || is_blank(summary) {
            return None;
        }
        Some(Self {
            date: date.to_string(),
            entry_type: entry_type.to_string(),
            summary: summary.to_string(),
            evidence,
        })
    }

    pub fn is_complete(&self) -> bool {
        !(is_blank(&self.date) || is_blank(&self.entry_type) || is_blank(&self.summary))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissingInfoItem {
    pub id: String,
    pub severity: Severity,
    pub message: String,
    #[serde(default)]
    pub evidence: Vec<Evidence>,
}

impl MissingInfoItem {
    pub fn is_complete(&self) -> bool {
        !(is_blank(&self.id) || is_blank(self.severity.as_str()) || is_blank(&self.message))
    }
}

/// Two distinguishable chart occurrences that disagree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContradictionItem {
    pub id: String,
    pub severity: Severity,
    pub message: String,
    pub evidence: Vec<Evidence>,
}

impl ContradictionItem {
    /// Minimum number of pointers a contradiction needs: one per side.
    pub const MIN_EVIDENCE: usize = 2;

    pub fn new(id: &str, severity: Severity, message: String, evidence: Vec<Evidence>) -> Option<Self> {
        if evidence.len() < Self::MIN_EVIDENCE {
            return None;
        }
        Some(Self {
            id: id.to_string(),
            severity,
            message,
            evidence,
        })
    }
}

/// Bullet-point summary where every tagged bullet is backed by a citation entry.
///
/// Unknown fields are rejected so a model response must match this shape exactly.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NarrativeSummary {
    pub patient_id: String,
    #[serde(default)]
    pub summary_bullets: Vec<String>,
    #[serde(default)]
    pub risk_bullets: Vec<String>,
    #[serde(default)]
    pub followup_questions: Vec<String>,
    #[serde(default)]
    pub citations: BTreeMap<String, Vec<String>>,
}

impl NarrativeSummary {
    /// Every cited doc id, across all tags.
    pub fn cited_doc_ids(&self) -> impl Iterator<Item = &str> {
        self.citations.values().flatten().map(String::as_str)
    }
}

/// Everything the analysis produces for one chart.
///
/// Agent outputs are `None` when the agents were not enabled for the run,
/// which is distinct from "enabled and found nothing".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub snapshot: Option<String>,
    /// Pointers backing the `src:` tokens in the snapshot text.
    #[serde(default)]
    pub snapshot_evidence: Vec<Evidence>,
    pub risks: Vec<RiskFinding>,
    pub narrative: Option<NarrativeSummary>,
    pub timeline: Option<Vec<TimelineEntry>>,
    pub missing_info: Option<Vec<MissingInfoItem>>,
    pub contradictions: Option<Vec<ContradictionItem>>,
    #[serde(default)]
    pub meta: BTreeMap<String, String>,
}

fn is_blank(value: &str) -> bool {
    value.trim().is_empty()
}
