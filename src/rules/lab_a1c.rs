use crate::models::{Chart, Severity};

use super::series::{fmt_value, Series};
use super::{Evaluation, RawFinding, RuleError};

pub const RULE_ID: &str = "lab_a1c_elevated";
pub const A1C_CODE: &str = "4548-4";

const DIABETES_THRESHOLD: f64 = 6.5;
const PREDIABETES_THRESHOLD: f64 = 5.7;

/// Classify the most recent dated A1c into clinical bands.
pub fn evaluate(chart: &Chart) -> Result<Evaluation, RuleError> {
    let series = Series::collect(chart, A1C_CODE)?;
    if series.total == 0 {
        return Ok(Evaluation::abstain("no a1c observations"));
    }
    let Some(latest) = series.latest() else {
        return Ok(Evaluation::abstain("no dated numeric values"));
    };

    let (severity, band) = if latest.value >= DIABETES_THRESHOLD {
        (Severity::High, "diabetes")
    } else if latest.value >= PREDIABETES_THRESHOLD {
        (Severity::Medium, "prediabetes")
    } else {
        return Ok(Evaluation::abstain("value normal"));
    };

    let unit = latest.unit.map(|u| format!(" {u}")).unwrap_or_default();
    let message = format!(
        "A1c in {band} range: {}{unit} on {}",
        fmt_value(latest.value),
        latest.day()
    );
    Ok(Evaluation::fire(RawFinding::new(severity, message, latest.evidence())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::chart::fixtures;
    use crate::rules::{normalize_findings, RULES};

    fn run(chart: &Chart) -> Vec<crate::models::RiskFinding> {
        let entry = RULES.iter().find(|r| r.id == RULE_ID).unwrap();
        match evaluate(chart).unwrap() {
            Evaluation::Fired(raw) => normalize_findings(entry, raw),
            Evaluation::Abstained(_) => vec![],
        }
    }

    #[test]
    fn single_high_a1c_fires_once() {
        let mut chart = fixtures::chart();
        chart.observations = vec![fixtures::observation("a1", A1C_CODE, Some(7.2), Some("%"), Some("2024-02-10"))];
        let findings = run(&chart);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::High);
        assert_eq!(findings[0].evidence.len(), 1);
        assert_eq!(findings[0].message, "A1c in diabetes range: 7.2 % on 2024-02-10");
    }

    #[test]
    fn prediabetes_band_is_medium() {
        let mut chart = fixtures::chart();
        chart.observations = vec![fixtures::observation("a1", A1C_CODE, Some(6.0), Some("%"), Some("2024-02-10"))];
        let findings = run(&chart);
        assert_eq!(findings[0].severity, Severity::Medium);
        assert!(findings[0].message.contains("prediabetes"));
    }

    #[test]
    fn uses_most_recent_sample() {
        let mut chart = fixtures::chart();
        chart.observations = fixtures::series("a", A1C_CODE, "%", &[("2024-05-01", 5.2), ("2023-01-01", 8.0)]);
        assert!(matches!(evaluate(&chart).unwrap(), Evaluation::Abstained(r) if r == "value normal"));
    }

    #[test]
    fn undated_values_abstain() {
        let mut chart = fixtures::chart();
        chart.observations = vec![fixtures::observation("a1", A1C_CODE, Some(9.0), Some("%"), None)];
        assert!(matches!(evaluate(&chart).unwrap(), Evaluation::Abstained(r) if r == "no dated numeric values"));
        chart.observations.clear();
        assert!(matches!(evaluate(&chart).unwrap(), Evaluation::Abstained(r) if r == "no a1c observations"));
    }
}
