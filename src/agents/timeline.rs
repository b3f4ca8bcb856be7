use std::cmp::Ordering;

use chrono::NaiveDateTime;

use crate::models::datetime::iso_datetime;
use crate::models::{first_non_blank, Chart, Encounter, Evidence, Observation, TimelineEntry};
use crate::rules::series::fmt_value;

/// Default cap on returned entries.
pub const DEFAULT_MAX_ENTRIES: usize = 20;

fn category_label(obs: &Observation) -> &'static str {
    let category = obs.category.as_deref().unwrap_or_default().to_lowercase();
    if category.contains("vital") {
        "VITAL"
    } else if category.contains("lab") {
        "LAB"
    } else {
        "OBSERVATION"
    }
}

fn observation_summary(obs: &Observation) -> String {
    let label = first_non_blank(&[obs.display.as_deref(), obs.code.as_deref()]).unwrap_or("observation");
    let value = obs
        .value_text
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .or_else(|| obs.value.map(fmt_value));
    match value {
        Some(value) => {
            let unit = obs.unit.as_deref().map(str::trim).unwrap_or_default();
            format!("{label}: {value} {unit}").trim().to_string()
        }
        None => format!("{label} observation recorded"),
    }
}

fn encounter_summary(encounter: &Encounter) -> String {
    let label = first_non_blank(&[encounter.encounter_type.as_deref(), encounter.reason.as_deref()])
        .unwrap_or("encounter");
    format!("{label} recorded")
}

/// Chart sources, or a pointer synthesized from the item's own id.
fn evidence_or_self(sources: &[Evidence], resource_type: &str, id: &str) -> Vec<Evidence> {
    if !sources.is_empty() {
        return sources.to_vec();
    }
    if id.trim().is_empty() {
        return Vec::new();
    }
    vec![Evidence::new(resource_type, id)]
}

fn sort_identity(entry: &TimelineEntry) -> &str {
    entry.evidence.first().map(Evidence::identity).unwrap_or_default()
}

/// Project dated encounters and observations into timeline entries, most
/// recent first, capped at `max_entries`.
pub fn build_timeline(chart: &Chart, max_entries: usize) -> Vec<TimelineEntry> {
    let mut dated: Vec<(NaiveDateTime, TimelineEntry)> = Vec::new();

    for encounter in &chart.encounters {
        let Some(date) = encounter.date() else {
            continue;
        };
        let evidence = evidence_or_self(&encounter.sources, "Encounter", &encounter.id);
        if let Some(entry) =
            TimelineEntry::new(&iso_datetime(&date), "ENCOUNTER", &encounter_summary(encounter), evidence)
        {
            dated.push((date, entry));
        }
    }

    for obs in &chart.observations {
        let Some(date) = obs.effective else {
            continue;
        };
        let evidence = evidence_or_self(&obs.sources, "Observation", &obs.id);
        if let Some(entry) =
            TimelineEntry::new(&iso_datetime(&date), category_label(obs), &observation_summary(obs), evidence)
        {
            dated.push((date, entry));
        }
    }

    // Descending on every key; ties keep chart order.
    dated.sort_by(|(da, a), (db, b)| -> Ordering {
        db.cmp(da)
            .then_with(|| b.entry_type.cmp(&a.entry_type))
            .then_with(|| b.summary.cmp(&a.summary))
            .then_with(|| sort_identity(b).cmp(sort_identity(a)))
    });

    dated.into_iter().take(max_entries).map(|(_, entry)| entry).collect()
}
