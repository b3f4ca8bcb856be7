//! Evaluation manifest: patients, seeded expectations and gate thresholds.

use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};

use super::EvalError;
use crate::models::AnalysisMode;

/// Treat an explicit `null` like a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn default_version() -> String {
    "unknown".to_string()
}

fn default_name() -> String {
    "unknown".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Manifest {
    #[serde(default = "default_version", deserialize_with = "version_string")]
    pub version: String,
    #[serde(default)]
    pub mode: Option<AnalysisMode>,
    #[serde(default = "default_true")]
    pub enable_agents: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub gates: Gates,
    #[serde(default, deserialize_with = "null_as_default")]
    pub patients: Vec<PatientCase>,
}

/// Versions appear as strings or numbers in manifests.
fn version_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match Option::<serde_json::Value>::deserialize(deserializer)? {
        None | Some(serde_json::Value::Null) => default_version(),
        Some(serde_json::Value::String(s)) => s,
        Some(other) => other.to_string(),
    })
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PatientCase {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default)]
    pub path: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub expects: Expects,
}

/// Expected ids per category. Extra detections are tolerated unless the
/// matching `allow_extra_*` is explicitly `false`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Expects {
    #[serde(default, deserialize_with = "null_as_default")]
    pub risks: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub missing_info_ids: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub contradiction_ids: Vec<String>,
    #[serde(default)]
    pub allow_extra_risks: Option<bool>,
    #[serde(default)]
    pub allow_extra_missing_info: Option<bool>,
    #[serde(default)]
    pub allow_extra_contradictions: Option<bool>,
}

fn id_set(values: &[String]) -> BTreeSet<String> {
    values.iter().filter(|v| !v.trim().is_empty()).cloned().collect()
}

impl Expects {
    pub fn risk_ids(&self) -> BTreeSet<String> {
        id_set(&self.risks)
    }

    pub fn missing_info_ids(&self) -> BTreeSet<String> {
        id_set(&self.missing_info_ids)
    }

    pub fn contradiction_ids(&self) -> BTreeSet<String> {
        id_set(&self.contradiction_ids)
    }

    pub fn allows_extra_risks(&self) -> bool {
        self.allow_extra_risks.unwrap_or(true)
    }

    pub fn allows_extra_missing_info(&self) -> bool {
        self.allow_extra_missing_info.unwrap_or(true)
    }

    pub fn allows_extra_contradictions(&self) -> bool {
        self.allow_extra_contradictions.unwrap_or(true)
    }
}

/// Minimum metric values a patient must reach to pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "GateOverrides")]
pub struct Gates {
    pub min_risk_precision: f64,
    pub min_risk_recall: f64,
    pub min_missing_precision: f64,
    pub min_missing_recall: f64,
    pub min_contradiction_precision: f64,
    pub min_contradiction_recall: f64,
    pub min_narrative_citation_coverage: f64,
    pub min_risk_citation_coverage: f64,
    pub min_timeline_citation_coverage: f64,
    pub min_contradiction_citation_coverage: f64,
    /// Only applied in model mode.
    pub min_llm_ok_rate: Option<f64>,
}

impl Default for Gates {
    fn default() -> Self {
        Self {
            min_risk_precision: 0.0,
            min_risk_recall: 1.0,
            min_missing_precision: 0.0,
            min_missing_recall: 1.0,
            min_contradiction_precision: 0.0,
            min_contradiction_recall: 1.0,
            min_narrative_citation_coverage: 0.0,
            min_risk_citation_coverage: 1.0,
            min_timeline_citation_coverage: 1.0,
            min_contradiction_citation_coverage: 1.0,
            min_llm_ok_rate: None,
        }
    }
}

impl Gates {
    /// Thresholds in the same order as [`super::scoring::METRIC_KEYS`].
    pub fn thresholds(&self) -> [f64; 10] {
        [
            self.min_risk_precision,
            self.min_risk_recall,
            self.min_missing_precision,
            self.min_missing_recall,
            self.min_contradiction_precision,
            self.min_contradiction_recall,
            self.min_narrative_citation_coverage,
            self.min_risk_citation_coverage,
            self.min_timeline_citation_coverage,
            self.min_contradiction_citation_coverage,
        ]
    }
}

/// Gate values as written in a manifest; unknown keys are ignored and
/// nulls keep the default.
#[derive(Debug, Default, Deserialize)]
struct GateOverrides {
    min_risk_precision: Option<f64>,
    min_risk_recall: Option<f64>,
    min_missing_precision: Option<f64>,
    min_missing_recall: Option<f64>,
    min_contradiction_precision: Option<f64>,
    min_contradiction_recall: Option<f64>,
    min_narrative_citation_coverage: Option<f64>,
    min_risk_citation_coverage: Option<f64>,
    min_timeline_citation_coverage: Option<f64>,
    min_contradiction_citation_coverage: Option<f64>,
    min_llm_ok_rate: Option<f64>,
}

impl From<GateOverrides> for Gates {
    fn from(o: GateOverrides) -> Self {
        let d = Gates::default();
        Self {
            min_risk_precision: o.min_risk_precision.unwrap_or(d.min_risk_precision),
            min_risk_recall: o.min_risk_recall.unwrap_or(d.min_risk_recall),
            min_missing_precision: o.min_missing_precision.unwrap_or(d.min_missing_precision),
            min_missing_recall: o.min_missing_recall.unwrap_or(d.min_missing_recall),
            min_contradiction_precision: o.min_contradiction_precision.unwrap_or(d.min_contradiction_precision),
            min_contradiction_recall: o.min_contradiction_recall.unwrap_or(d.min_contradiction_recall),
            min_narrative_citation_coverage: o
                .min_narrative_citation_coverage
                .unwrap_or(d.min_narrative_citation_coverage),
            min_risk_citation_coverage: o.min_risk_citation_coverage.unwrap_or(d.min_risk_citation_coverage),
            min_timeline_citation_coverage: o
                .min_timeline_citation_coverage
                .unwrap_or(d.min_timeline_citation_coverage),
            min_contradiction_citation_coverage: o
                .min_contradiction_citation_coverage
                .unwrap_or(d.min_contradiction_citation_coverage),
            min_llm_ok_rate: o.min_llm_ok_rate.or(d.min_llm_ok_rate),
        }
    }
}

pub fn load_manifest(path: &Path) -> Result<Manifest, EvalError> {
    let display = path.display().to_string();
    let raw = std::fs::read_to_string(path).map_err(|source| EvalError::ManifestIo {
        path: display.clone(),
        source,
    })?;
    let manifest: Manifest =
        serde_json::from_str(&raw).map_err(|source| EvalError::ManifestJson { path: display, source })?;
    tracing::info!(
        version = %manifest.version,
        patients = manifest.patients.len(),
        "Manifest loaded"
    );
    Ok(manifest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn gates_merge_over_defaults() {
        let manifest: Manifest = serde_json::from_str(
            r#"{"version": 3, "gates": {"min_risk_precision": 0.5, "min_risk_recall": null, "unknown_gate": 9}, "patients": []}"#,
        )
        .unwrap();
        assert_eq!(manifest.version, "3");
        assert_eq!(manifest.gates.min_risk_precision, 0.5);
        assert_eq!(manifest.gates.min_risk_recall, 1.0);
        assert_eq!(manifest.gates.min_llm_ok_rate, None);
        assert!(manifest.enable_agents);
        assert_eq!(manifest.mode, None);
    }

    #[test]
    fn missing_sections_take_defaults() {
        let manifest: Manifest =
            serde_json::from_str(r#"{"gates": null, "patients": [{"path": "charts/a.json", "expects": null}]}"#).unwrap();
        assert_eq!(manifest.version, "unknown");
        assert_eq!(manifest.gates, Gates::default());
        let patient = &manifest.patients[0];
        assert_eq!(patient.name, "unknown");
        assert!(patient.expects.allows_extra_risks());
        assert!(patient.expects.risk_ids().is_empty());
    }

    #[test]
    fn expects_skip_blank_ids_and_respect_strict_flags() {
        let expects: Expects = serde_json::from_str(
            r#"{"risks": ["lab_a1c_elevated", " "], "allow_extra_risks": false, "allow_extra_missing_info": null}"#,
        )
        .unwrap();
        assert_eq!(expects.risk_ids().len(), 1);
        assert!(!expects.allows_extra_risks());
        assert!(expects.allows_extra_missing_info());
    }

    #[test]
    fn load_reports_io_and_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.json");
        assert!(matches!(load_manifest(&missing), Err(EvalError::ManifestIo { .. })));

        let bad = dir.path().join("bad.json");
        std::fs::File::create(&bad).unwrap().write_all(b"{not json").unwrap();
        assert!(matches!(load_manifest(&bad), Err(EvalError::ManifestJson { .. })));

        let good = dir.path().join("good.json");
        std::fs::write(&good, r#"{"version": "v1", "mode": "llm", "patients": []}"#).unwrap();
        assert_eq!(load_manifest(&good).unwrap().mode, Some(AnalysisMode::Llm));
    }
}
