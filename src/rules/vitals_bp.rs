use chrono::NaiveDateTime;

use crate::models::{Chart, Observation, Severity};

use super::{Evaluation, RawFinding, RuleError};

pub const RULE_ID: &str = "vitals_bp_elevated";
pub const BP_PANEL_CODE: &str = "85354-9";
pub const SYSTOLIC_CODE: &str = "8480-6";
pub const DIASTOLIC_CODE: &str = "8462-4";

// Staged thresholds (mmHg): crisis, then stage 2.
const CRISIS_SYSTOLIC: f64 = 180.0;
const CRISIS_DIASTOLIC: f64 = 120.0;
const ELEVATED_SYSTOLIC: f64 = 140.0;
const ELEVATED_DIASTOLIC: f64 = 90.0;

/// Parse a textual "systolic/diastolic" reading such as "142/91".
pub fn parse_bp_text(text: &str) -> Option<(f64, f64)> {
    let mut parts = text.split('/');
    let systolic = parts.next()?.trim().parse::<f64>().ok()?;
    let diastolic = parts.next()?.trim().parse::<f64>().ok()?;
    Some((systolic, diastolic))
}

/// Systolic/diastolic of a BP panel: components first, text as fallback for
/// whichever half is missing.
pub fn resolve_reading(obs: &Observation) -> Result<Option<(f64, f64)>, RuleError> {
    let mut systolic = obs.component_value(SYSTOLIC_CODE);
    let mut diastolic = obs.component_value(DIASTOLIC_CODE);
    if systolic.is_none() || diastolic.is_none() {
        if let Some((s, d)) = obs.value_text.as_deref().and_then(parse_bp_text) {
            systolic = systolic.or(Some(s));
            diastolic = diastolic.or(Some(d));
        }
    }
    match (systolic, diastolic) {
        (Some(s), Some(d)) if s.is_finite() && d.is_finite() => Ok(Some((s, d))),
        (Some(_), Some(_)) => Err(RuleError::MalformedComponent {
            observation_id: obs.id.clone(),
            detail: "non-finite blood pressure".into(),
        }),
        _ => Ok(None),
    }
}

/// Most recent parsable BP panel.
pub fn latest_reading(chart: &Chart) -> Result<LatestReading<'_>, RuleError> {
    let mut total = 0;
    let mut latest: Option<(NaiveDateTime, f64, f64, &Observation)> = None;
    for obs in chart.observations.iter().filter(|o| o.has_code(BP_PANEL_CODE)) {
        total += 1;
        let Some(date) = obs.effective else {
            continue;
        };
        let Some((s, d)) = resolve_reading(obs)? else {
            continue;
        };
        if latest.as_ref().map_or(true, |(current, ..)| date >= *current) {
            latest = Some((date, s, d, obs));
        }
    }
    Ok(match latest {
        Some((date, systolic, diastolic, observation)) => LatestReading::Found {
            date,
            systolic,
            diastolic,
            observation,
        },
        None if total == 0 => LatestReading::NoPanels,
        None => LatestReading::Unparsable,
    })
}

pub enum LatestReading<'a> {
    NoPanels,
    Unparsable,
    Found {
        date: NaiveDateTime,
        systolic: f64,
        diastolic: f64,
        observation: &'a Observation,
    },
}

pub fn evaluate(chart: &Chart) -> Result<Evaluation, RuleError> {
    let (date, systolic, diastolic, observation) = match latest_reading(chart)? {
        LatestReading::NoPanels => return Ok(Evaluation::abstain("no BP obs")),
        LatestReading::Unparsable => {
            return Ok(Evaluation::abstain("cannot parse systolic/diastolic"))
        }
        LatestReading::Found {
            date,
            systolic,
            diastolic,
            observation,
        } => (date, systolic, diastolic, observation),
    };

    let severity = if systolic >= CRISIS_SYSTOLIC || diastolic >= CRISIS_DIASTOLIC {
        Severity::High
    } else if systolic >= ELEVATED_SYSTOLIC || diastolic >= ELEVATED_DIASTOLIC {
        Severity::Medium
    } else {
        return Ok(Evaluation::abstain("normal"));
    };

    let message = format!(
        "elevated BP: {systolic:.0}/{diastolic:.0} on {}",
        date.format("%Y-%m-%d")
    );
    Ok(Evaluation::fire(RawFinding::new(
        severity,
        message,
        observation.sources.clone(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::chart::fixtures;

    #[test]
    fn crisis_reading_is_high() {
        let mut chart = fixtures::chart();
        chart.observations = vec![
            fixtures::bp_panel("bp-old", 120.0, 80.0, "2023-01-01"),
            fixtures::bp_panel("bp-new", 185.0, 100.0, "2024-01-01"),
        ];
        let Evaluation::Fired(findings) = evaluate(&chart).unwrap() else {
            panic!("expected finding");
        };
        assert_eq!(findings[0].severity.as_deref(), Some("high"));
        assert_eq!(findings[0].message.as_deref(), Some("elevated BP: 185/100 on 2024-01-01"));
        assert_eq!(findings[0].evidence.len(), 1);
    }

    #[test]
    fn text_fallback_fills_missing_components() {
        let mut panel = fixtures::bp_panel("bp", 0.0, 0.0, "2024-01-01");
        panel.components.clear();
        panel.value_text = Some("142 / 91".into());
        let mut chart = fixtures::chart();
        chart.observations = vec![panel];
        let Evaluation::Fired(findings) = evaluate(&chart).unwrap() else {
            panic!("expected finding");
        };
        assert_eq!(findings[0].severity.as_deref(), Some("medium"));
    }

    #[test]
    fn normal_and_unparsable_abstain() {
        let mut chart = fixtures::chart();
        chart.observations = vec![fixtures::bp_panel("bp", 118.0, 76.0, "2024-01-01")];
        assert!(matches!(evaluate(&chart).unwrap(), Evaluation::Abstained(r) if r == "normal"));

        chart.observations[0].components.clear();
        chart.observations[0].value_text = Some("high".into());
        assert!(matches!(
            evaluate(&chart).unwrap(),
            Evaluation::Abstained(r) if r == "cannot parse systolic/diastolic"
        ));
    }

    #[test]
    fn parse_bp_text_rejects_partial() {
        assert_eq!(parse_bp_text("120/80"), Some((120.0, 80.0)));
        assert_eq!(parse_bp_text("120"), None);
        assert_eq!(parse_bp_text("abc/80"), None);
    }
}
