use chrono::{Duration, NaiveDateTime};

use crate::models::{Chart, Condition, Evidence, MissingInfoItem, Severity};
use crate::rules::lab_a1c::A1C_CODE;
use crate::rules::vitals_bp::BP_PANEL_CODE;

/// A chronic condition and the observation that should monitor it.
pub struct MonitoringRule {
    pub id: &'static str,
    pub severity: Severity,
    /// Case-insensitive substrings matched against condition display and code.
    pub condition_tokens: &'static [&'static str],
    pub observation_code: &'static str,
    pub staleness_days: i64,
    pub message: &'static str,
}

pub static MONITORING_RULES: &[MonitoringRule] = &[
    MonitoringRule {
        id: "missing_hba1c_recent",
        severity: Severity::Medium,
        condition_tokens: &["diabetes"],
        observation_code: A1C_CODE,
        staleness_days: 365,
        message: "Diabetes is documented in the record, but no HbA1c observation was found within the past 12 months.",
    },
    MonitoringRule {
        id: "missing_bp_recent",
        severity: Severity::Low,
        condition_tokens: &["hypertension", "high blood pressure", "htn"],
        observation_code: BP_PANEL_CODE,
        staleness_days: 180,
        message: "Hypertension is documented in the record, but no blood pressure measurements were found within the past 6 months.",
    },
];

/// Latest date anywhere in the chart's observations and encounters.
pub fn reference_date(chart: &Chart) -> Option<NaiveDateTime> {
    let observed = chart.observations.iter().filter_map(|o| o.effective);
    let encountered = chart
        .encounters
        .iter()
        .flat_map(|e| [e.start, e.end])
        .flatten();
    observed.chain(encountered).max()
}

fn matching_conditions<'a>(chart: &'a Chart, tokens: &[&str]) -> Vec<&'a Condition> {
    chart
        .conditions
        .iter()
        .filter(|c| {
            let text = format!(
                "{} {}",
                c.display.as_deref().unwrap_or_default(),
                c.code.as_deref().unwrap_or_default()
            )
            .to_lowercase();
            tokens.iter().any(|t| text.contains(t))
        })
        .collect()
}

fn most_recent_observation(chart: &Chart, code: &str) -> Option<NaiveDateTime> {
    chart
        .observations
        .iter()
        .filter(|o| o.has_code(code))
        .filter_map(|o| o.effective)
        .max()
}

/// Flag chronic conditions whose routine monitoring is absent or stale
/// relative to the chart's own latest date.
pub fn detect_missing_info(chart: &Chart) -> Vec<MissingInfoItem> {
    let Some(reference) = reference_date(chart) else {
        return Vec::new();
    };

    let mut missing = Vec::new();
    for rule in MONITORING_RULES {
        let conditions = matching_conditions(chart, rule.condition_tokens);
        if conditions.is_empty() {
            continue;
        }
        let cutoff = reference - Duration::days(rule.staleness_days);
        let is_current = most_recent_observation(chart, rule.observation_code).is_some_and(|d| d >= cutoff);
        if is_current {
            continue;
        }
        let evidence: Vec<Evidence> = conditions.iter().flat_map(|c| c.sources.iter().cloned()).collect();
        tracing::debug!(item = rule.id, conditions = conditions.len(), "Monitoring gap detected");
        missing.push(MissingInfoItem {
            id: rule.id.to_string(),
            severity: rule.severity,
            message: rule.message.to_string(),
            evidence,
        });
    }
    missing
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::chart::fixtures;

    fn ids(items: &[MissingInfoItem]) -> Vec<&str> {
        items.iter().map(|i| i.id.as_str()).collect()
    }

    #[test]
    fn diabetes_without_a1c_is_flagged() {
        let mut chart = fixtures::chart();
        chart.conditions = vec![fixtures::condition("c1", "Type 2 Diabetes Mellitus", Some("2015-01-01"))];
        chart.encounters = vec![fixtures::encounter("e1", "Checkup", "2024-06-01")];
        let items = detect_missing_info(&chart);
        assert_eq!(ids(&items), ["missing_hba1c_recent"]);
        assert_eq!(items[0].severity, Severity::Medium);
        assert_eq!(items[0].evidence[0].doc_id(), "Condition/c1");
    }

    #[test]
    fn stale_a1c_counts_as_missing_but_recent_does_not() {
        let mut chart = fixtures::chart();
        chart.conditions = vec![fixtures::condition("c1", "Diabetes", None)];
        chart.encounters = vec![fixtures::encounter("e1", "Checkup", "2024-06-01")];
        chart.observations = vec![fixtures::observation("a", A1C_CODE, Some(7.0), Some("%"), Some("2023-05-01"))];
        assert_eq!(ids(&detect_missing_info(&chart)), ["missing_hba1c_recent"]);

        chart.observations[0].effective = Some(fixtures::ts("2023-06-10"));
        assert!(detect_missing_info(&chart).is_empty());
    }

    #[test]
    fn hypertension_synonyms_match() {
        let mut chart = fixtures::chart();
        let mut htn = fixtures::condition("c2", " ", None);
        htn.code = Some("HTN".into());
        chart.conditions = vec![htn];
        chart.observations = vec![fixtures::bp_panel("bp", 150.0, 95.0, "2023-01-01")];
        chart.encounters = vec![fixtures::encounter("e1", "Checkup", "2024-01-01")];
        let items = detect_missing_info(&chart);
        assert_eq!(ids(&items), ["missing_bp_recent"]);
        assert_eq!(items[0].severity, Severity::Low);
    }

    #[test]
    fn undated_chart_yields_nothing() {
        let mut chart = fixtures::chart();
        chart.conditions = vec![fixtures::condition("c1", "Diabetes", None)];
        assert!(detect_missing_info(&chart).is_empty());
    }
}
