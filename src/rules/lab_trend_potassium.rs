use crate::models::{Chart, Severity};

use super::series::{fmt_value, strictly_decreasing, strictly_increasing, Series};
use super::{Evaluation, RawFinding, RuleError};

pub const RULE_ID: &str = "lab_trend_potassium";
pub const POTASSIUM_CODE: &str = "6298-4";

/// Reference range in mmol/L.
pub const NORMAL_LOW: f64 = 3.0;
pub const NORMAL_HIGH: f64 = 5.5;
/// Absolute first-to-last change considered significant.
pub const SWING: f64 = 0.8;
pub const RISE_RATIO: f64 = 1.25;

/// Potassium: out-of-range values first, then large swings, then a
/// monotonic tail.
pub fn evaluate(chart: &Chart) -> Result<Evaluation, RuleError> {
    let series = Series::collect(chart, POTASSIUM_CODE)?;
    if series.total == 0 {
        return Ok(Evaluation::abstain("no potassium observations"));
    }
    let Some(recent) = series.recent_three() else {
        return Ok(Evaluation::abstain(format!(
            "insufficient dated numeric values (total={}, usable={})",
            series.total,
            series.usable()
        )));
    };

    let units = series.distinct_units(false);
    if units.len() > 1 {
        let listed: Vec<&str> = units.iter().flatten().copied().collect();
        return Ok(Evaluation::abstain(format!("unit mismatch (units={})", listed.join(", "))));
    }
    let unit = units.first().copied().flatten();

    // Range check only applies when the unit is known to be mmol-based.
    if unit.is_some_and(|u| u.to_lowercase().contains("mmol")) {
        let out_of_range = series
            .samples
            .iter()
            .position(|s| s.value < NORMAL_LOW || s.value > NORMAL_HIGH);
        if let Some(idx) = out_of_range {
            let value = series.samples[idx].value;
            let message = format!("potassium out of range: {} {}", fmt_value(value), unit.unwrap_or_default())
                .trim()
                .to_string();
            return Ok(Evaluation::fire(RawFinding::new(
                Severity::High,
                message,
                series.evidence_around(idx),
            )));
        }
    }

    let n = series.usable();
    let first = &series.samples[0];
    let last = &series.samples[n - 1];
    let swung = (last.value - first.value).abs() >= SWING;
    let ratio_rise = first.value != 0.0 && last.value / first.value >= RISE_RATIO;

    if swung || ratio_rise {
        let message = format!(
            "potassium changed from {} on {} to {} on {}",
            fmt_value(first.value),
            first.day(),
            fmt_value(last.value),
            last.day()
        );
        return Ok(Evaluation::fire(RawFinding::new(
            Severity::Medium,
            message,
            series.evidence_at(&[0, n - 2, n - 1]),
        )));
    }

    if strictly_increasing(recent) || strictly_decreasing(recent) {
        let message = format!(
            "potassium trend from {} on {} to {} on {}",
            fmt_value(recent[0].value),
            recent[0].day(),
            fmt_value(recent[2].value),
            recent[2].day()
        );
        return Ok(Evaluation::fire(RawFinding::new(
            Severity::Medium,
            message,
            series.evidence_at(&[n - 3, n - 2, n - 1]),
        )));
    }

    Ok(Evaluation::abstain(format!(
        "trend criteria not met (total={}, usable={})",
        series.total,
        series.usable()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::chart::fixtures;

    fn chart_with(unit: &str, values: &[f64]) -> Chart {
        let dates = ["2024-01-01", "2024-02-01", "2024-03-01", "2024-04-01", "2024-05-01"];
        let points: Vec<(&str, f64)> = dates.iter().copied().zip(values.iter().copied()).collect();
        let mut chart = fixtures::chart();
        chart.observations = fixtures::series("k", POTASSIUM_CODE, unit, &points);
        chart
    }

    fn fired(chart: &Chart) -> RawFinding {
        match evaluate(chart).unwrap() {
            Evaluation::Fired(mut findings) => findings.remove(0),
            Evaluation::Abstained(reason) => panic!("abstained: {reason}"),
        }
    }

    #[test]
    fn out_of_range_fires_high_with_framing_evidence() {
        let chart = chart_with("mmol/L", &[3.1, 3.3, 3.5, 4.9, 5.8]);
        let finding = fired(&chart);
        assert_eq!(finding.severity.as_deref(), Some("high"));
        assert_eq!(finding.message.as_deref(), Some("potassium out of range: 5.8 mmol/L"));
        assert!(finding.evidence.len() <= 3);
        assert_eq!(finding.evidence.len(), 3);
    }

    #[test]
    fn range_check_skipped_for_non_mmol_units() {
        let chart = chart_with("mEq/L", &[4.0, 4.0, 6.0]);
        let finding = fired(&chart);
        assert_eq!(finding.severity.as_deref(), Some("medium"));
        assert!(finding.message.unwrap().starts_with("potassium changed from"));
    }

    #[test]
    fn monotonic_decrease_fires_medium() {
        let chart = chart_with("mmol/L", &[4.0, 4.2, 4.1, 3.9, 3.8]);
        let finding = fired(&chart);
        assert_eq!(finding.severity.as_deref(), Some("medium"));
        assert_eq!(
            finding.message.as_deref(),
            Some("potassium trend from 4.1 on 2024-03-01 to 3.8 on 2024-05-01")
        );
    }

    #[test]
    fn in_range_monotonic_rise_fires_medium() {
        let chart = chart_with("mmol/L", &[4.0, 4.1, 4.2]);
        let finding = fired(&chart);
        assert_eq!(finding.severity.as_deref(), Some("medium"));
        assert_eq!(
            finding.message.as_deref(),
            Some("potassium trend from 4.0 on 2024-01-01 to 4.2 on 2024-03-01")
        );
        let evidence = crate::models::normalize_all(finding.evidence);
        let ids: Vec<&str> = evidence.iter().map(|e| e.doc_id()).collect();
        assert_eq!(ids, vec!["Observation/k-0", "Observation/k-1", "Observation/k-2"]);
    }

    #[test]
    fn stable_series_abstains() {
        let chart = chart_with("mmol/L", &[4.0, 4.2, 4.0, 4.1]);
        assert!(matches!(evaluate(&chart).unwrap(), Evaluation::Abstained(r) if r.starts_with("trend criteria not met")));
    }

    #[test]
    fn two_samples_never_fire() {
        let chart = chart_with("mmol/L", &[2.0, 7.0]);
        assert!(matches!(evaluate(&chart).unwrap(), Evaluation::Abstained(r) if r.starts_with("insufficient")));
    }

    #[test]
    fn missing_units_do_not_count_as_mismatch() {
        let mut chart = chart_with("mmol/L", &[4.0, 4.1, 4.2]);
        chart.observations[0].unit = None;
        assert!(matches!(evaluate(&chart).unwrap(), Evaluation::Fired(_)));
        chart.observations[0].unit = Some("mg/dL".into());
        assert!(matches!(evaluate(&chart).unwrap(), Evaluation::Abstained(r) if r.starts_with("unit mismatch")));
    }
}
