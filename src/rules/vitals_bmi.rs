use crate::models::{Chart, Severity};

use super::series::{fmt_value, Series};
use super::{Evaluation, RawFinding, RuleError};

pub const RULE_ID: &str = "vitals_bmi_obesity";
pub const BMI_CODE: &str = "39156-5";

const CLASS_III: f64 = 40.0;
const OBESE: f64 = 30.0;

pub fn evaluate(chart: &Chart) -> Result<Evaluation, RuleError> {
    let series = Series::collect(chart, BMI_CODE)?;
    if series.total == 0 {
        return Ok(Evaluation::abstain("no BMI obs"));
    }
    let Some(latest) = series.latest() else {
        return Ok(Evaluation::abstain("no dated numeric values"));
    };

    let (severity, band) = if latest.value >= CLASS_III {
        (Severity::High, "obesity class III")
    } else if latest.value >= OBESE {
        (Severity::Medium, "obesity range")
    } else {
        return Ok(Evaluation::abstain("normal"));
    };

    let message = format!("BMI in {band}: {} on {}", fmt_value(latest.value), latest.day());
    Ok(Evaluation::fire(RawFinding::new(severity, message, latest.evidence())))
}
