//! Threshold gates over patient metrics and the model ok-rate.

use super::manifest::Gates;
use super::report::PatientReport;
use super::scoring::{PatientMetrics, METRIC_KEYS};
use crate::models::LlmStatus;

#[derive(Debug, Clone, PartialEq)]
pub struct GateOutcome {
    pub patient_pass: bool,
    pub failures: Vec<String>,
}

pub fn gate_failure(metric: &str, threshold: f64, value: f64) -> String {
    format!("{metric} < {threshold:.2} ({value:.2})")
}

/// Compare every headline metric against its minimum.
pub fn evaluate_gates(metrics: &PatientMetrics, gates: &Gates) -> GateOutcome {
    let failures: Vec<String> = METRIC_KEYS
        .iter()
        .zip(metrics.values())
        .zip(gates.thresholds())
        .filter(|((_, value), threshold)| value < threshold)
        .map(|((metric, value), threshold)| gate_failure(metric, threshold, value))
        .collect();
    GateOutcome {
        patient_pass: failures.is_empty(),
        failures,
    }
}

/// Share of attempted (ok or failed) patients whose model call succeeded.
/// 0.0 when nothing was attempted.
pub fn llm_ok_rate(patients: &[PatientReport]) -> f64 {
    let (mut attempted, mut ok) = (0usize, 0usize);
    for status in patients.iter().filter_map(PatientReport::llm_status) {
        match status {
            LlmStatus::Ok => {
                attempted += 1;
                ok += 1;
            }
            LlmStatus::Failed => attempted += 1,
            LlmStatus::Skipped => {}
        }
    }
    if attempted == 0 {
        0.0
    } else {
        ok as f64 / attempted as f64
    }
}

/// Fail every patient when the run's ok-rate is below the configured
/// minimum. Returns the failure string when the gate tripped.
pub fn apply_ok_rate_gate(patients: &mut [PatientReport], gates: &Gates, rate: f64) -> Option<String> {
    let threshold = gates.min_llm_ok_rate?;
    if rate >= threshold {
        return None;
    }
    let failure = gate_failure("llm_ok_rate", threshold, rate);
    tracing::warn!(rate, threshold, "LLM ok-rate gate failed");
    for patient in patients.iter_mut() {
        patient.add_failure(failure.clone());
    }
    Some(failure)
}
