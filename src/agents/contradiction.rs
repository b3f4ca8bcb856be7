use chrono::NaiveDateTime;

use crate::models::{Chart, ContradictionItem, Evidence, Severity};

pub const CONFLICTING_ONSET_ID: &str = "conflicting_condition_onset";

struct Occurrence<'a> {
    onset: NaiveDateTime,
    label: &'a str,
    evidence: Vec<Evidence>,
}

/// Group conditions by label (first-seen order) keeping only occurrences
/// with an onset and at least one identified pointer.
fn group_conditions(chart: &Chart) -> Vec<(String, Vec<Occurrence<'_>>)> {
    let mut groups: Vec<(String, Vec<Occurrence<'_>>)> = Vec::new();
    for condition in &chart.conditions {
        let Some(label) = condition.label() else {
            continue;
        };
        let Some(onset) = condition.onset else {
            continue;
        };
        let evidence: Vec<Evidence> = condition
            .sources
            .iter()
            .filter(|e| e.is_identified())
            .cloned()
            .collect();
        if evidence.is_empty() {
            continue;
        }
        let key = label.to_lowercase();
        let occurrence = Occurrence { onset, label, evidence };
        match groups.iter_mut().find(|(k, _)| *k == key) {
            Some((_, occurrences)) => occurrences.push(occurrence),
            None => groups.push((key, vec![occurrence])),
        }
    }
    groups
}

/// Report the first condition recorded with conflicting onset dates.
///
/// At most one contradiction is returned: the earliest occurrence of the
/// first conflicting group against the first later occurrence that falls on
/// a different calendar day.
pub fn detect_contradictions(chart: &Chart) -> Vec<ContradictionItem> {
    for (_, mut occurrences) in group_conditions(chart) {
        if occurrences.len() < 2 {
            continue;
        }
        occurrences.sort_by_key(|o| o.onset);
        let first = &occurrences[0];
        for candidate in &occurrences[1..] {
            if candidate.onset.date() == first.onset.date() {
                continue;
            }
            let evidence: Vec<Evidence> = first
                .evidence
                .iter()
                .chain(&candidate.evidence)
                .cloned()
                .collect();
            let message = format!(
                "The condition '{}' appears multiple times in the record with conflicting onset dates.",
                first.label
            );
            if let Some(item) = ContradictionItem::new(CONFLICTING_ONSET_ID, Severity::Low, message, evidence) {
                return vec![item];
            }
        }
    }
    Vec::new()
}
