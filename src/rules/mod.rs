//! Risk rule engine.
//!
//! A fixed, ordered registry of detectors. Each evaluator is a pure function
//! over the chart that either fires raw findings or abstains with a reason.
//! The engine normalizes raw findings into [`RiskFinding`]s and isolates
//! failures: a detector that errors contributes nothing and the batch goes on.

pub mod lab_a1c;
pub mod lab_trend_creatinine;
pub mod lab_trend_potassium;
pub mod series;
pub mod vitals_bmi;
pub mod vitals_bp;

use std::collections::BTreeMap;

use thiserror::Error;

use crate::models::{normalize_all, Chart, Evidence, EvidenceInput, RiskFinding, Severity};

/// Message used when a detector fires without saying anything.
pub const DEFAULT_MESSAGE: &str = "risk detected";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RuleError {
    #[error("Observation {observation_id} carries a non-finite value")]
    NonFiniteValue { observation_id: String },

    #[error("Observation {observation_id} has an unreadable component: {detail}")]
    MalformedComponent {
        observation_id: String,
        detail: String,
    },
}

// ---------------------------------------------------------------------------
// Detector contract
// ---------------------------------------------------------------------------

/// A finding as a detector reports it. Any field may be left for the
/// registry entry to fill in.
#[derive(Debug, Clone, Default)]
pub struct RawFinding {
    pub rule_id: Option<String>,
    pub severity: Option<String>,
    pub message: Option<String>,
    pub evidence: Vec<EvidenceInput>,
}

impl RawFinding {
    pub fn new(severity: Severity, message: String, evidence: Vec<Evidence>) -> Self {
        Self {
            rule_id: None,
            severity: Some(severity.as_str().to_string()),
            message: Some(message),
            evidence: evidence.into_iter().map(EvidenceInput::from).collect(),
        }
    }
}

/// What one detector run produced: findings, or an abstention reason.
#[derive(Debug, Clone)]
pub enum Evaluation {
    Fired(Vec<RawFinding>),
    Abstained(String),
}

impl Evaluation {
    pub fn fire(finding: RawFinding) -> Self {
        Self::Fired(vec![finding])
    }

    pub fn abstain(reason: impl Into<String>) -> Self {
        Self::Abstained(reason.into())
    }
}

pub type Evaluator = fn(&Chart) -> Result<Evaluation, RuleError>;

pub struct RuleEntry {
    pub id: &'static str,
    pub default_severity: Severity,
    pub evaluator: Evaluator,
}

/// Every detector, in evaluation order.
pub static RULES: &[RuleEntry] = &[
    RuleEntry {
        id: lab_a1c::RULE_ID,
        default_severity: Severity::Medium,
        evaluator: lab_a1c::evaluate,
    },
    RuleEntry {
        id: lab_trend_creatinine::RULE_ID,
        default_severity: Severity::Medium,
        evaluator: lab_trend_creatinine::evaluate,
    },
    RuleEntry {
        id: lab_trend_potassium::RULE_ID,
        default_severity: Severity::Medium,
        evaluator: lab_trend_potassium::evaluate,
    },
    RuleEntry {
        id: vitals_bmi::RULE_ID,
        default_severity: Severity::Medium,
        evaluator: vitals_bmi::evaluate,
    },
    RuleEntry {
        id: vitals_bp::RULE_ID,
        default_severity: Severity::Medium,
        evaluator: vitals_bp::evaluate,
    },
];

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

/// Coerce raw findings into canonical ones, filling gaps from the entry.
pub fn normalize_findings(entry: &RuleEntry, raw: Vec<RawFinding>) -> Vec<RiskFinding> {
    raw.into_iter()
        .map(|finding| {
            let severity = match finding.severity.as_deref() {
                Some(label) if !label.trim().is_empty() => Severity::coerce(label),
                _ => entry.default_severity,
            };
            RiskFinding {
                rule_id: finding
                    .rule_id
                    .filter(|id| !id.trim().is_empty())
                    .unwrap_or_else(|| entry.id.to_string()),
                severity,
                message: finding
                    .message
                    .filter(|m| !m.trim().is_empty())
                    .unwrap_or_else(|| DEFAULT_MESSAGE.to_string()),
                evidence: normalize_all(finding.evidence),
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Per-detector result after isolation.
#[derive(Debug, Clone)]
pub enum RuleOutcome {
    Fired(usize),
    Abstained(String),
    Failed(RuleError),
}

impl RuleOutcome {
    /// Diagnostic reason, if the detector produced nothing.
    pub fn reason(&self) -> Option<String> {
        match self {
            Self::Fired(_) => None,
            Self::Abstained(reason) => Some(reason.clone()),
            Self::Failed(err) => Some(format!("error: {err}")),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RuleRun {
    pub findings: Vec<RiskFinding>,
    /// Abstention/failure reason per rule id; populated only in debug mode.
    pub diagnostics: BTreeMap<String, String>,
}

pub struct RuleEngine {
    rules: &'static [RuleEntry],
    debug: bool,
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self::new(false)
    }
}

impl RuleEngine {
    pub fn new(debug: bool) -> Self {
        Self { rules: RULES, debug }
    }

    /// Engine over a custom registry.
    pub fn with_rules(rules: &'static [RuleEntry], debug: bool) -> Self {
        Self { rules, debug }
    }

    pub fn rule_ids(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.rules.iter().map(|r| r.id)
    }

    /// Run every detector sequentially.
    pub fn run(&self, chart: &Chart) -> RuleRun {
        let mut run = RuleRun::default();

        for entry in self.rules {
            let outcome = match (entry.evaluator)(chart) {
                Ok(Evaluation::Fired(raw)) => {
                    let findings = normalize_findings(entry, raw);
                    let count = findings.len();
                    run.findings.extend(findings);
                    RuleOutcome::Fired(count)
                }
                Ok(Evaluation::Abstained(reason)) => {
                    tracing::debug!(rule_id = entry.id, reason = %reason, "Rule abstained");
                    RuleOutcome::Abstained(reason)
                }
                Err(e) => {
                    tracing::warn!(rule_id = entry.id, error = %e, "Rule failed, skipping");
                    RuleOutcome::Failed(e)
                }
            };

            if self.debug {
                if let Some(reason) = outcome.reason() {
                    run.diagnostics.insert(entry.id.to_string(), reason);
                }
            }
        }

        tracing::info!(
            patient_id = %chart.patient_id,
            rules = self.rules.len(),
            findings = run.findings.len(),
            "Rule engine complete"
        );
        run
    }
}
