//! Plain-text chart snapshot.
//!
//! The snapshot is what the narrative step reads: a patient line, recent
//! problems, medications, key vitals/labs and the rule findings. Every
//! line that states a chart fact ends in `| src: <doc id>` and the
//! pointers behind those tokens are returned alongside the text.

use chrono::{Datelike, NaiveDate, NaiveDateTime};

use crate::agents::missing_info::reference_date;
use crate::models::{first_non_blank, Chart, Evidence, RiskFinding};
use crate::rules::series::{fmt_value, Series};
use crate::rules::vitals_bp::{latest_reading, LatestReading};
use crate::rules::{lab_a1c, lab_trend_creatinine, lab_trend_potassium, vitals_bmi};

pub const PROBLEMS_HEADER: &str = "Recent problems:";
pub const MEDICATIONS_HEADER: &str = "Medications:";
pub const VITALS_HEADER: &str = "Key vitals/labs:";
pub const RISKS_HEADER: &str = "Risks:";
/// Marker between a line's text and its citation token.
pub const SRC_MARKER: &str = " | src:";
/// Prefix of an evidence line under a risk header.
pub const RISK_SRC_PREFIX: &str = "  - src: ";

const MAX_PROBLEMS: usize = 5;
const MAX_MEDICATIONS: usize = 8;

/// Labs shown after blood pressure, in display order.
const KEY_LABS: &[(&str, &str)] = &[
    (vitals_bmi::BMI_CODE, "BMI"),
    (lab_a1c::A1C_CODE, "A1c"),
    (lab_trend_creatinine::CREATININE_CODE, "Creatinine"),
    (lab_trend_potassium::POTASSIUM_CODE, "Potassium"),
];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub text: String,
    /// Pointers behind every `src:` token in `text`.
    pub evidence: Vec<Evidence>,
}

fn day(dt: &NaiveDateTime) -> String {
    dt.format("%Y-%m-%d").to_string()
}

fn years_between(earlier: NaiveDate, later: NaiveDate) -> i32 {
    let mut years = later.year() - earlier.year();
    if (later.month(), later.day()) < (earlier.month(), earlier.day()) {
        years -= 1;
    }
    years
}

/// The item's first source, or a pointer built from its own id.
fn cite(sources: &[Evidence], resource_type: &str, id: &str) -> Evidence {
    sources
        .first()
        .cloned()
        .unwrap_or_else(|| Evidence::new(resource_type, id))
}

struct Builder {
    lines: Vec<String>,
    evidence: Vec<Evidence>,
}

impl Builder {
    fn line(&mut self, text: String) {
        self.lines.push(text);
    }

    fn cited(&mut self, text: String, evidence: Evidence) {
        self.lines.push(format!("{text}{SRC_MARKER} {}", evidence.doc_id()));
        self.evidence.push(evidence);
    }
}

/// Render the snapshot for `chart` with the engine's `risks`.
pub fn build_snapshot(chart: &Chart, risks: &[RiskFinding]) -> Snapshot {
    let mut out = Builder {
        lines: Vec::new(),
        evidence: Vec::new(),
    };

    let last_seen = reference_date(chart);
    let age = match (chart.demographics.birth_date, last_seen) {
        (Some(birth), Some(seen)) => years_between(birth, seen.date()).to_string(),
        _ => "unknown".to_string(),
    };
    out.line(format!(
        "Patient: {} | sex={} | age={} | last_seen={}",
        chart.patient_id,
        chart.demographics.gender.as_deref().unwrap_or("unknown"),
        age,
        last_seen.as_ref().map(day).unwrap_or_else(|| "unknown".into())
    ));

    out.line(PROBLEMS_HEADER.into());
    let mut problems: Vec<_> = chart
        .conditions
        .iter()
        .filter_map(|c| c.onset.or(c.abatement).map(|d| (d, c)))
        .collect();
    problems.sort_by(|a, b| b.0.cmp(&a.0));
    for (date, condition) in problems.into_iter().take(MAX_PROBLEMS) {
        let label = condition.label().unwrap_or("condition");
        out.cited(
            format!("{} | {label}", day(&date)),
            cite(&condition.sources, "Condition", &condition.id),
        );
    }

    out.line(MEDICATIONS_HEADER.into());
    let mut medications: Vec<_> = chart
        .medications
        .iter()
        .filter_map(|m| m.authored_on.map(|d| (d, m)))
        .collect();
    medications.sort_by(|a, b| b.0.cmp(&a.0));
    for (date, med) in medications.into_iter().take(MAX_MEDICATIONS) {
        let label = first_non_blank(&[med.name.as_deref()]).unwrap_or("medication");
        out.cited(
            format!("{} | {label}", day(&date)),
            cite(&med.sources, "MedicationRequest", &med.id),
        );
    }

    out.line(VITALS_HEADER.into());
    match latest_reading(chart) {
        Ok(LatestReading::Found {
            date,
            systolic,
            diastolic,
            observation,
        }) => out.cited(
            format!("BP (85354-9): {systolic:.0}/{diastolic:.0} on {}", day(&date)),
            cite(&observation.sources, "Observation", &observation.id),
        ),
        Ok(_) => {}
        Err(e) => tracing::warn!(error = %e, "Skipping blood pressure in snapshot"),
    }
    for (code, label) in KEY_LABS {
        let series = match Series::collect(chart, code) {
            Ok(series) => series,
            Err(e) => {
                tracing::warn!(code, error = %e, "Skipping lab in snapshot");
                continue;
            }
        };
        if let Some(latest) = series.latest() {
            let unit = latest.unit.map(|u| format!(" {u}")).unwrap_or_default();
            out.cited(
                format!("{label} ({code}): {}{unit} on {}", fmt_value(latest.value), latest.day()),
                cite(&latest.observation.sources, "Observation", &latest.observation.id),
            );
        }
    }

    out.line(RISKS_HEADER.into());
    for risk in risks {
        out.line(format!("{} | {} | {}", risk.rule_id, risk.severity, risk.message));
        for evidence in &risk.evidence {
            out.line(format!("{RISK_SRC_PREFIX}{}", evidence.doc_id()));
        }
    }

    Snapshot {
        text: out.lines.join("\n"),
        evidence: out.evidence,
    }
}
