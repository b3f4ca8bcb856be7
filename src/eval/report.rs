//! Per-mode reports, multi-mode merge and the text/JSON renderings.

use std::collections::BTreeMap;

use serde::Serialize;

use super::gates::{apply_ok_rate_gate, llm_ok_rate};
use super::manifest::Gates;
use super::scoring::{PatientMetrics, METRIC_KEYS};
use crate::config::LLM_SKIP_MESSAGE;
use crate::models::{AnalysisMode, LlmStatus};

/// What happened to the model call for one patient.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LlmOutcome {
    pub status: LlmStatus,
    pub reason: Option<String>,
    pub errors: Vec<String>,
}

impl LlmOutcome {
    pub fn ok() -> Self {
        Self {
            status: LlmStatus::Ok,
            reason: None,
            errors: Vec::new(),
        }
    }

    pub fn skipped(reason: &str) -> Self {
        Self {
            status: LlmStatus::Skipped,
            reason: Some(reason.to_string()),
            errors: Vec::new(),
        }
    }

    /// `kind` is the short error type name.
    pub fn failed(kind: &str) -> Self {
        Self {
            status: LlmStatus::Failed,
            reason: Some(format!("llm failed: {kind}")),
            errors: vec![kind.to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatientReport {
    pub name: String,
    pub path: String,
    /// Present only when the patient was actually scored.
    pub metrics: Option<PatientMetrics>,
    pub patient_pass: bool,
    pub failures: Vec<String>,
    /// Present only in model mode.
    pub llm: Option<LlmOutcome>,
}

impl PatientReport {
    pub fn scored(name: &str, path: &str, metrics: PatientMetrics, patient_pass: bool, failures: Vec<String>) -> Self {
        let mut report = Self {
            name: name.to_string(),
            path: path.to_string(),
            metrics: Some(metrics),
            patient_pass,
            failures,
            llm: None,
        };
        report.failures.sort();
        report
    }

    pub fn unscored(name: &str, path: &str, llm: Option<LlmOutcome>) -> Self {
        Self {
            name: name.to_string(),
            path: path.to_string(),
            metrics: None,
            patient_pass: true,
            failures: Vec::new(),
            llm,
        }
    }

    pub fn llm_status(&self) -> Option<LlmStatus> {
        self.llm.as_ref().map(|o| o.status)
    }

    /// Scored and, in model mode, the call succeeded.
    pub fn is_ok(&self) -> bool {
        self.metrics.is_some() && matches!(self.llm_status(), None | Some(LlmStatus::Ok))
    }

    pub fn add_failure(&mut self, failure: String) {
        self.patient_pass = false;
        if !failure.is_empty() {
            self.failures.push(failure);
            self.failures.sort();
        }
    }

    /// Failed calls always fail the patient; skipped ones only when the
    /// model was required.
    pub fn apply_llm_overrides(&mut self, require_llm: bool) {
        match self.llm_status() {
            Some(LlmStatus::Failed) => self.add_failure("llm_failed".into()),
            Some(LlmStatus::Skipped) if require_llm => self.add_failure("llm_required_but_skipped".into()),
            _ => {}
        }
    }
}

/// Macro average of each headline metric over scored patients. Empty when
/// no patient was scored.
pub fn summarize(patients: &[PatientReport]) -> BTreeMap<&'static str, f64> {
    let scored: Vec<&PatientMetrics> = patients
        .iter()
        .filter(|p| p.is_ok())
        .filter_map(|p| p.metrics.as_ref())
        .collect();
    if scored.is_empty() {
        return BTreeMap::new();
    }
    let n = scored.len() as f64;
    METRIC_KEYS
        .iter()
        .enumerate()
        .map(|(i, key)| (*key, scored.iter().map(|m| m.values()[i]).sum::<f64>() / n))
        .collect()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LlmCounts {
    pub ok: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub fn llm_counts(patients: &[PatientReport]) -> LlmCounts {
    let mut counts = LlmCounts::default();
    for status in patients.iter().filter_map(PatientReport::llm_status) {
        match status {
            LlmStatus::Ok => counts.ok += 1,
            LlmStatus::Skipped => counts.skipped += 1,
            LlmStatus::Failed => counts.failed += 1,
        }
    }
    counts
}

/// Run-level settings echoed into the report.
#[derive(Debug, Clone, PartialEq)]
pub struct RunHeader {
    pub version: String,
    pub mode: AnalysisMode,
    pub enable_agents: bool,
    pub gates: Gates,
    pub require_llm: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModeReport {
    pub version: String,
    pub mode: AnalysisMode,
    pub enable_agents: bool,
    pub gates: Gates,
    pub patients: Vec<PatientReport>,
    pub summary: BTreeMap<&'static str, f64>,
    pub overall_pass: bool,
    pub patients_failed: usize,
    pub skipped_patients: usize,
    pub skipped_reason: Option<String>,
    pub llm_ok: usize,
    pub llm_skipped: usize,
    pub llm_failed: usize,
    pub llm_ok_rate: Option<f64>,
    pub llm_ok_rate_failure: Option<String>,
    pub llm_retried: usize,
    pub require_llm: bool,
}

impl ModeReport {
    /// Apply the ok-rate gate (model mode only) and compute the totals.
    pub fn assemble(
        header: RunHeader,
        mut patients: Vec<PatientReport>,
        llm_retried: usize,
        skipped_reason: Option<String>,
    ) -> Self {
        let (ok_rate, ok_rate_failure) = match header.mode {
            AnalysisMode::Llm => {
                let rate = llm_ok_rate(&patients);
                (Some(rate), apply_ok_rate_gate(&mut patients, &header.gates, rate))
            }
            AnalysisMode::Mock => (None, None),
        };
        let counts = llm_counts(&patients);
        let patients_failed = patients.iter().filter(|p| !p.patient_pass).count();

        Self {
            version: header.version,
            mode: header.mode,
            enable_agents: header.enable_agents,
            gates: header.gates,
            summary: summarize(&patients),
            overall_pass: patients_failed == 0,
            patients_failed,
            skipped_patients: if skipped_reason.is_some() { counts.skipped } else { 0 },
            skipped_reason,
            llm_ok: counts.ok,
            llm_skipped: counts.skipped,
            llm_failed: counts.failed,
            llm_ok_rate: ok_rate,
            llm_ok_rate_failure: ok_rate_failure,
            llm_retried,
            require_llm: header.require_llm,
            patients,
        }
    }

    pub fn failed_names(&self) -> Vec<&str> {
        self.patients
            .iter()
            .filter(|p| !p.patient_pass)
            .map(|p| p.name.as_str())
            .collect()
    }
}

fn failure_counts<'a>(failures: impl Iterator<Item = &'a String>) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for failure in failures {
        *counts.entry(failure.clone()).or_insert(0) += 1;
    }
    counts
}

// ---------------------------------------------------------------------------
// Text rendering
// ---------------------------------------------------------------------------

const TABLE_HEADER: [&str; 20] = [
    "patient", "risk_p", "risk_r", "risk_tp", "risk_fp", "risk_fn", "missing_p", "missing_r", "miss_tp",
    "miss_fp", "miss_fn", "contr_p", "contr_r", "contr_tp", "contr_fp", "contr_fn", "narr_cite", "risk_cite",
    "tl_cite", "contr_cite",
];

fn rule() -> String {
    "-".repeat(72)
}

fn row_cells(patient: &PatientReport) -> Vec<String> {
    let f = |v: f64| format!("{v:.2}");
    let mut cells = vec![patient.name.clone()];
    match patient.metrics.as_ref().filter(|_| patient.is_ok()) {
        Some(m) => {
            for score in [&m.risks, &m.missing_info, &m.contradictions] {
                cells.extend([
                    f(score.precision),
                    f(score.recall),
                    score.tp.to_string(),
                    score.fp.to_string(),
                    score.fn_.to_string(),
                ]);
            }
            cells.extend([
                f(m.narrative_citation_coverage),
                f(m.risk_evidence_coverage),
                f(m.timeline_evidence_coverage),
                f(m.contradiction_evidence_coverage),
            ]);
        }
        None => cells.extend(std::iter::repeat("NA".to_string()).take(TABLE_HEADER.len() - 1)),
    }
    cells
}

/// The full summary table for one mode.
pub fn render_summary(report: &ModeReport) -> String {
    let llm = report.mode == AnalysisMode::Llm;
    let mut lines = vec![format!("Eval summary (mode={})", report.mode), rule()];

    let mut header: Vec<&str> = TABLE_HEADER.to_vec();
    if llm {
        header.extend(["llm_status", "llm_reason"]);
    }
    lines.push(header.join(" | "));

    for patient in &report.patients {
        let mut cells = row_cells(patient);
        if llm {
            let outcome = patient.llm.as_ref();
            cells.push(outcome.map(|o| o.status.to_string()).unwrap_or_default());
            cells.push(outcome.and_then(|o| o.reason.clone()).unwrap_or_default());
        }
        lines.push(cells.join(" | "));
    }
    lines.push(rule());

    let averages: Vec<String> = METRIC_KEYS
        .iter()
        .map(|key| match report.summary.get(key) {
            Some(v) => format!("{v:.2}"),
            None => "NA".to_string(),
        })
        .collect();
    lines.push(format!("macro avg | {}", averages.join(" | ")));
    lines.push(rule());
    lines.push(overall_line(report));

    let failed = report.failed_names();
    if failed.is_empty() {
        lines.push("patients_failed: []".to_string());
    } else {
        lines.push(format!("patients_failed: {}", failed.join(", ")));
    }

    let counts = failure_counts(report.patients.iter().flat_map(|p| &p.failures));
    if !counts.is_empty() {
        let mut ordered: Vec<(&String, &usize)> = counts.iter().collect();
        ordered.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
        let display: Vec<String> = ordered.iter().map(|(name, n)| format!("{name}={n}")).collect();
        lines.push(format!("failure_counts: {}", display.join(", ")));
    }
    to_text(lines)
}

/// Overall line plus one line per failing patient.
pub fn render_quiet(report: &ModeReport) -> String {
    let mut lines = vec![overall_line(report)];
    if report.mode == AnalysisMode::Llm && report.llm_skipped > 0 {
        lines.push(LLM_SKIP_MESSAGE.to_string());
    }
    lines.extend(
        report
            .patients
            .iter()
            .filter(|p| !p.failures.is_empty())
            .map(|p| format!("FAIL {}: {}", p.name, p.failures.join(", "))),
    );
    to_text(lines)
}

fn overall_line(report: &ModeReport) -> String {
    format!(
        "overall_pass: {} | patients_failed: {}",
        report.overall_pass, report.patients_failed
    )
}

fn to_text(lines: Vec<String>) -> String {
    let mut out = lines.join("\n");
    out.push('\n');
    out
}

// ---------------------------------------------------------------------------
// JSON payload
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LlmFields {
    pub llm_status: LlmStatus,
    pub llm_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModeEntry {
    pub patient_pass: bool,
    pub failures: Vec<String>,
    #[serde(flatten)]
    pub llm: Option<LlmFields>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatientEntry {
    pub name: String,
    pub path: String,
    pub patient_pass: bool,
    pub failures: Vec<String>,
    pub modes: BTreeMap<String, ModeEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModeSummary {
    pub mode: AnalysisMode,
    pub overall_pass: bool,
    pub patients_failed: usize,
    pub llm_ok: usize,
    pub llm_skipped: usize,
    pub llm_failed: usize,
    pub llm_ok_rate: Option<f64>,
    pub llm_retried: usize,
    pub require_llm: bool,
}

impl From<&ModeReport> for ModeSummary {
    fn from(r: &ModeReport) -> Self {
        Self {
            mode: r.mode,
            overall_pass: r.overall_pass,
            patients_failed: r.patients_failed,
            llm_ok: r.llm_ok,
            llm_skipped: r.llm_skipped,
            llm_failed: r.llm_failed,
            llm_ok_rate: r.llm_ok_rate,
            llm_retried: r.llm_retried,
            require_llm: r.require_llm,
        }
    }
}

/// Merge mode reports per patient. The first report fixes the patient
/// list; a patient passes only if it passes in every mode.
pub fn per_patient(reports: &[ModeReport]) -> Vec<PatientEntry> {
    let Some(first) = reports.first() else {
        return Vec::new();
    };
    first
        .patients
        .iter()
        .map(|base| {
            let mut entry = PatientEntry {
                name: base.name.clone(),
                path: base.path.clone(),
                patient_pass: true,
                failures: Vec::new(),
                modes: BTreeMap::new(),
            };
            for report in reports {
                let Some(patient) = report
                    .patients
                    .iter()
                    .find(|p| p.name == base.name && p.path == base.path)
                else {
                    continue;
                };
                let mut failures = patient.failures.clone();
                failures.sort();
                entry.patient_pass &= patient.patient_pass;
                entry.failures.extend(failures.iter().cloned());
                let llm = match report.mode {
                    AnalysisMode::Llm => patient.llm.as_ref().map(|o| LlmFields {
                        llm_status: o.status,
                        llm_reason: o.reason.clone(),
                    }),
                    AnalysisMode::Mock => None,
                };
                entry.modes.insert(
                    report.mode.to_string(),
                    ModeEntry {
                        patient_pass: patient.patient_pass,
                        failures,
                        llm,
                    },
                );
            }
            entry.failures.sort();
            entry.failures.dedup();
            entry
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JsonPayload {
    pub version: Option<String>,
    pub overall_pass: bool,
    pub patients_failed_count: usize,
    pub patients_failed: Vec<String>,
    pub failure_counts: BTreeMap<String, usize>,
    pub per_patient: Vec<PatientEntry>,
    pub require_llm: bool,
    pub modes: BTreeMap<String, ModeSummary>,
}

impl JsonPayload {
    pub fn build(reports: &[ModeReport], require_llm: bool) -> Self {
        let per_patient = per_patient(reports);
        let patients_failed: Vec<String> = per_patient
            .iter()
            .filter(|p| !p.patient_pass)
            .map(|p| p.name.clone())
            .collect();
        Self {
            version: reports.first().map(|r| r.version.clone()),
            overall_pass: per_patient.iter().all(|p| p.patient_pass),
            patients_failed_count: patients_failed.len(),
            patients_failed,
            failure_counts: failure_counts(per_patient.iter().flat_map(|p| &p.failures)),
            require_llm,
            modes: reports
                .iter()
                .map(|r| (r.mode.to_string(), ModeSummary::from(r)))
                .collect(),
            per_patient,
        }
    }

    /// Compact JSON with keys sorted at every level.
    pub fn to_sorted_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_value(self).and_then(|v| serde_json::to_string(&v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::scoring::CategoryScore;

    fn header(mode: AnalysisMode) -> RunHeader {
        RunHeader {
            version: "v1".into(),
            mode,
            enable_agents: true,
            gates: Gates::default(),
            require_llm: false,
        }
    }

    fn metrics(risk_precision: f64) -> PatientMetrics {
        let perfect = CategoryScore {
            precision: 1.0,
            recall: 1.0,
            ..Default::default()
        };
        PatientMetrics {
            risks: CategoryScore {
                precision: risk_precision,
                ..perfect.clone()
            },
            missing_info: perfect.clone(),
            contradictions: perfect,
            narrative_citation_coverage: 1.0,
            risk_evidence_coverage: 1.0,
            timeline_evidence_coverage: 1.0,
            contradiction_evidence_coverage: 1.0,
        }
    }

    #[test]
    fn summary_averages_scored_patients_only() {
        let mut failed = PatientReport::unscored("b", "b.json", Some(LlmOutcome::failed("Timeout")));
        failed.apply_llm_overrides(false);
        let mut ok = PatientReport::scored("a", "a.json", metrics(0.5), true, vec![]);
        ok.llm = Some(LlmOutcome::ok());

        let report = ModeReport::assemble(header(AnalysisMode::Llm), vec![ok, failed], 1, None);
        assert_eq!(report.summary["risk_precision"], 0.5);
        assert_eq!(report.llm_ok_rate, Some(0.5));
        assert_eq!((report.llm_ok, report.llm_failed), (1, 1));
        assert_eq!(report.patients_failed, 1);
        assert!(!report.overall_pass);
        assert_eq!(report.patients[1].failures, vec!["llm_failed".to_string()]);
        assert_eq!(
            report.patients[1].llm.as_ref().and_then(|o| o.reason.as_deref()),
            Some("llm failed: Timeout")
        );
    }

    #[test]
    fn skipped_only_fails_when_required() {
        let mut lenient = PatientReport::unscored("a", "a.json", Some(LlmOutcome::skipped(LLM_SKIP_MESSAGE)));
        lenient.apply_llm_overrides(false);
        assert!(lenient.patient_pass);

        let mut strict = lenient.clone();
        strict.apply_llm_overrides(true);
        assert!(!strict.patient_pass);
        assert_eq!(strict.failures, vec!["llm_required_but_skipped".to_string()]);
    }

    #[test]
    fn mock_reports_have_no_ok_rate() {
        let patient = PatientReport::scored("a", "a.json", metrics(1.0), true, vec![]);
        let report = ModeReport::assemble(header(AnalysisMode::Mock), vec![patient], 0, None);
        assert_eq!(report.llm_ok_rate, None);
        assert!(report.overall_pass);
        assert!(render_summary(&report).contains("overall_pass: true | patients_failed: 0"));
    }

    #[test]
    fn summary_table_marks_unscored_rows() {
        let mut skipped = PatientReport::unscored("b", "b.json", Some(LlmOutcome::skipped(LLM_SKIP_MESSAGE)));
        skipped.apply_llm_overrides(true);
        let report = ModeReport::assemble(header(AnalysisMode::Llm), vec![skipped], 0, Some(LLM_SKIP_MESSAGE.into()));
        let text = render_summary(&report);
        assert!(text.contains("b | NA | NA"));
        assert!(text.contains("| skipped | llm skipped: missing keys"));
        assert!(text.contains("macro avg | NA"));
        assert!(text.contains("failure_counts: llm_required_but_skipped=1"));
        assert_eq!(report.skipped_patients, 1);

        assert!(text.ends_with("failure_counts: llm_required_but_skipped=1\n"));

        assert_eq!(
            render_quiet(&report),
            "overall_pass: false | patients_failed: 1\nllm skipped: missing keys\nFAIL b: llm_required_but_skipped\n"
        );
    }

    #[test]
    fn modes_merge_into_union_of_failures() {
        let mock = ModeReport::assemble(
            header(AnalysisMode::Mock),
            vec![PatientReport::scored("a", "a.json", metrics(1.0), false, vec!["risk_recall < 1.00 (0.50)".into()])],
            0,
            None,
        );
        let mut llm_patient = PatientReport::unscored("a", "a.json", Some(LlmOutcome::failed("Timeout")));
        llm_patient.apply_llm_overrides(false);
        let llm = ModeReport::assemble(header(AnalysisMode::Llm), vec![llm_patient], 0, None);

        let payload = JsonPayload::build(&[mock, llm], false);
        assert!(!payload.overall_pass);
        assert_eq!(payload.patients_failed, vec!["a".to_string()]);
        let entry = &payload.per_patient[0];
        assert_eq!(
            entry.failures,
            vec!["llm_failed".to_string(), "risk_recall < 1.00 (0.50)".to_string()]
        );
        assert!(entry.modes["mock"].llm.is_none());
        assert_eq!(entry.modes["llm"].llm.as_ref().map(|l| l.llm_status), Some(LlmStatus::Failed));
        assert_eq!(payload.failure_counts["llm_failed"], 1);

        let json = payload.to_sorted_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["per_patient"][0]["modes"]["llm"]["llm_reason"], "llm failed: Timeout");
        assert!(value["per_patient"][0]["modes"]["mock"].get("llm_status").is_none());
        assert_eq!(value["modes"]["llm"]["llm_ok_rate"], 0.0);
        assert!(json.find("\"failure_counts\"").unwrap() < json.find("\"modes\"").unwrap());
    }
}
