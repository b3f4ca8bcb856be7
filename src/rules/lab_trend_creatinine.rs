use crate::models::{Chart, Severity};

use super::series::{fmt_value, strictly_increasing, Series};
use super::{Evaluation, RawFinding, RuleError};

pub const RULE_ID: &str = "lab_trend_creatinine";
pub const CREATININE_CODE: &str = "2160-0";

/// Last/first ratio at or above which a rise is significant.
pub const RISE_RATIO: f64 = 1.25;
pub const MIN_SAMPLES: usize = 3;

/// Fire on a sustained creatinine rise.
pub fn evaluate(chart: &Chart) -> Result<Evaluation, RuleError> {
    let series = Series::collect(chart, CREATININE_CODE)?;
    if series.total == 0 {
        return Ok(Evaluation::abstain("no creatinine observations"));
    }
    if series.usable() == 0 {
        return Ok(Evaluation::abstain("no dated numeric values"));
    }
    let Some(recent) = series.recent_three() else {
        return Ok(Evaluation::abstain(format!(
            "insufficient dated numeric values (total={}, usable={})",
            series.total,
            series.usable()
        )));
    };
    if series.distinct_units(true).len() > 1 {
        return Ok(Evaluation::abstain("unit mismatch"));
    }

    let n = series.usable();
    let first = &series.samples[0];
    let last = &series.samples[n - 1];
    let ratio_rise = first.value != 0.0 && last.value / first.value >= RISE_RATIO;

    if !(ratio_rise || strictly_increasing(recent)) {
        return Ok(Evaluation::abstain("trend criteria not met"));
    }

    let message = format!(
        "creatinine increased from {} on {} to {} on {}",
        fmt_value(first.value),
        first.day(),
        fmt_value(last.value),
        last.day()
    );
    let evidence = series.evidence_at(&[0, n - 2, n - 1]);
    Ok(Evaluation::fire(RawFinding::new(Severity::Medium, message, evidence)))
}
