//! Canonical patient chart.
//!
//! Built once per request by the ingestion collaborator and handed to the
//! analysis core read-only. The on-disk form is the JSON serialization of
//! [`Chart`]; raw record bundles never reach this crate.

use std::path::Path;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::datetime::{deserialize_optional, deserialize_optional_date};
use super::evidence::{deserialize_sources, Evidence};

/// Code system the rule catalogue is written against.
pub const LOINC_SYSTEM: &str = "http://loinc.org";

#[derive(Error, Debug)]
pub enum ChartError {
    #[error("Failed to read chart {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed chart {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Demographics {
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default, deserialize_with = "deserialize_optional_date")]
    pub birth_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Encounter {
    pub id: String,
    #[serde(default, deserialize_with = "deserialize_optional")]
    pub start: Option<NaiveDateTime>,
    #[serde(default, deserialize_with = "deserialize_optional")]
    pub end: Option<NaiveDateTime>,
    #[serde(default, rename = "type")]
    pub encounter_type: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default, deserialize_with = "deserialize_sources")]
    pub sources: Vec<Evidence>,
}

impl Encounter {
    pub fn date(&self) -> Option<NaiveDateTime> {
        self.start.or(self.end)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Condition {
    pub id: String,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub code_system: Option<String>,
    #[serde(default)]
    pub display: Option<String>,
    #[serde(default, deserialize_with = "deserialize_optional")]
    pub onset: Option<NaiveDateTime>,
    #[serde(default, deserialize_with = "deserialize_optional")]
    pub abatement: Option<NaiveDateTime>,
    #[serde(default)]
    pub clinical_status: Option<String>,
    #[serde(default, deserialize_with = "deserialize_sources")]
    pub sources: Vec<Evidence>,
}

impl Condition {
    /// Display text, falling back to the code. Blank labels count as absent.
    pub fn label(&self) -> Option<&str> {
        first_non_blank(&[self.display.as_deref(), self.code.as_deref()])
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Medication {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "deserialize_optional")]
    pub authored_on: Option<NaiveDateTime>,
    #[serde(default)]
    pub dosage_text: Option<String>,
    #[serde(default, deserialize_with = "deserialize_sources")]
    pub sources: Vec<Evidence>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Allergy {
    pub id: String,
    #[serde(default)]
    pub substance: Option<String>,
    #[serde(default)]
    pub criticality: Option<String>,
    #[serde(default)]
    pub reaction: Option<String>,
    #[serde(default, deserialize_with = "deserialize_optional")]
    pub recorded_date: Option<NaiveDateTime>,
    #[serde(default, deserialize_with = "deserialize_sources")]
    pub sources: Vec<Evidence>,
}

/// A named sub-measurement of a panel observation (e.g. systolic in a BP panel).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObservationComponent {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub code_system: Option<String>,
    #[serde(default)]
    pub display: Option<String>,
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default)]
    pub unit: Option<String>,
}

/// Lab result or vital sign.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Observation {
    pub id: String,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub code_system: Option<String>,
    #[serde(default)]
    pub display: Option<String>,
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default)]
    pub value_text: Option<String>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default, deserialize_with = "deserialize_optional")]
    pub effective: Option<NaiveDateTime>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub components: Vec<ObservationComponent>,
    #[serde(default, deserialize_with = "deserialize_sources")]
    pub sources: Vec<Evidence>,
}

impl Observation {
    /// True when this observation carries `code` in LOINC (or an unstated system).
    pub fn has_code(&self, code: &str) -> bool {
        is_loinc(self.code_system.as_deref()) && self.code.as_deref() == Some(code)
    }

    /// Numeric value of the component coded `code`, if present.
    pub fn component_value(&self, code: &str) -> Option<f64> {
        self.components
            .iter()
            .find(|c| is_loinc(c.code_system.as_deref()) && c.code.as_deref() == Some(code))
            .and_then(|c| c.value)
    }
}

fn is_loinc(system: Option<&str>) -> bool {
    system.map_or(true, |s| s == LOINC_SYSTEM)
}

/// Canonical, read-only view of one patient's record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Chart {
    pub patient_id: String,
    #[serde(default)]
    pub demographics: Demographics,
    #[serde(default)]
    pub encounters: Vec<Encounter>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub medications: Vec<Medication>,
    #[serde(default)]
    pub allergies: Vec<Allergy>,
    #[serde(default)]
    pub observations: Vec<Observation>,
}

impl Chart {
    /// Find an observation by its chart id.
    pub fn observation(&self, id: &str) -> Option<&Observation> {
        self.observations.iter().find(|o| o.id == id)
    }
}

/// First candidate that is present and not blank, trimmed.
pub fn first_non_blank<'a>(candidates: &[Option<&'a str>]) -> Option<&'a str> {
    candidates
        .iter()
        .flatten()
        .copied()
        .map(str::trim)
        .find(|s| !s.is_empty())
}

/// Source of canonical charts, keyed by a path from the eval manifest.
pub trait ChartSource: Send + Sync {
    fn load(&self, path: &Path) -> Result<Chart, ChartError>;
}

/// Reads charts stored as canonical JSON documents.
pub struct JsonChartSource;

impl ChartSource for JsonChartSource {
    fn load(&self, path: &Path) -> Result<Chart, ChartError> {
        load_chart(path)
    }
}

/// Load a canonical chart JSON document.
pub fn load_chart(path: &Path) -> Result<Chart, ChartError> {
    let display = path.display().to_string();
    let raw = std::fs::read_to_string(path).map_err(|source| ChartError::Io {
        path: display.clone(),
        source,
    })?;
    let chart: Chart =
        serde_json::from_str(&raw).map_err(|source| ChartError::Json { path: display, source })?;
    tracing::debug!(
        patient_id = %chart.patient_id,
        observations = chart.observations.len(),
        conditions = chart.conditions.len(),
        "Chart loaded"
    );
    Ok(chart)
}

/// Chart builders shared by unit tests across the crate.
#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn ts(date: &str) -> NaiveDateTime {
        crate::models::datetime::parse_timestamp(date).unwrap()
    }

    pub fn chart() -> Chart {
        Chart {
            patient_id: "patient-1".into(),
            ..Default::default()
        }
    }

    pub fn observation(id: &str, code: &str, value: Option<f64>, unit: Option<&str>, date: Option<&str>) -> Observation {
        Observation {
            id: id.into(),
            code: Some(code.into()),
            code_system: Some(LOINC_SYSTEM.into()),
            display: None,
            value,
            value_text: None,
            unit: unit.map(Into::into),
            effective: date.map(ts),
            category: Some("laboratory".into()),
            components: vec![],
            sources: vec![Evidence::new("Observation", id)],
        }
    }

    pub fn series(prefix: &str, code: &str, unit: &str, points: &[(&str, f64)]) -> Vec<Observation> {
        points
            .iter()
            .enumerate()
            .map(|(i, (date, value))| {
                observation(&format!("{prefix}-{i}"), code, Some(*value), Some(unit), Some(date))
            })
            .collect()
    }

    pub fn bp_panel(id: &str, systolic: f64, diastolic: f64, date: &str) -> Observation {
        let component = |code: &str, value: f64| ObservationComponent {
            code: Some(code.into()),
            code_system: Some(LOINC_SYSTEM.into()),
            display: None,
            value: Some(value),
            unit: Some("mm[Hg]".into()),
        };
        Observation {
            components: vec![component("8480-6", systolic), component("8462-4", diastolic)],
            category: Some("vital-signs".into()),
            ..observation(id, "85354-9", None, None, Some(date))
        }
    }

    pub fn condition(id: &str, display: &str, onset: Option<&str>) -> Condition {
        Condition {
            id: id.into(),
            code: None,
            code_system: None,
            display: Some(display.into()),
            onset: onset.map(ts),
            abatement: None,
            clinical_status: Some("active".into()),
            sources: vec![Evidence::new("Condition", id)],
        }
    }

    pub fn encounter(id: &str, kind: &str, start: &str) -> Encounter {
        Encounter {
            id: id.into(),
            start: Some(ts(start)),
            end: None,
            encounter_type: Some(kind.into()),
            reason: None,
            sources: vec![Evidence::new("Encounter", id)],
        }
    }

    pub fn medication(id: &str, name: &str, authored_on: &str) -> Medication {
        Medication {
            id: id.into(),
            name: Some(name.into()),
            status: Some("active".into()),
            authored_on: Some(ts(authored_on)),
            dosage_text: None,
            sources: vec![Evidence::new("MedicationRequest", id)],
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn loads_canonical_json_with_mixed_evidence() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "patient_id": "p-42",
                "demographics": {{"gender": "female", "birth_date": "1970-02-03"}},
                "observations": [{{
                    "id": "o1", "code": "4548-4", "code_system": "http://loinc.org",
                    "value": 7.2, "unit": "%", "effective": "2024-01-05T09:30:00Z",
                    "sources": ["Observation/o1", {{"resource_type": "Observation", "resource_id": "o1b"}}]
                }}],
                "encounters": [{{"id": "e1", "start": "2024-01-05", "type": "Checkup"}}]
            }}"#
        )
        .unwrap();

        let chart = load_chart(file.path()).unwrap();
        assert_eq!(chart.patient_id, "p-42");
        assert_eq!(chart.demographics.birth_date, NaiveDate::from_ymd_opt(1970, 2, 3));
        let obs = &chart.observations[0];
        assert!(obs.has_code("4548-4"));
        assert_eq!(obs.sources.len(), 2);
        assert_eq!(obs.sources[1].doc_id(), "Observation/o1b");
        assert_eq!(chart.encounters[0].encounter_type.as_deref(), Some("Checkup"));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = load_chart(Path::new("/nonexistent/chart.json")).unwrap_err();
        assert!(matches!(err, ChartError::Io { .. }));
    }

    #[test]
    fn malformed_json_is_reported() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{not json").unwrap();
        let err = load_chart(file.path()).unwrap_err();
        assert!(matches!(err, ChartError::Json { .. }));
    }

    #[test]
    fn foreign_code_system_does_not_match() {
        let mut obs = fixtures::observation("o", "4548-4", Some(6.0), None, None);
        assert!(obs.has_code("4548-4"));
        obs.code_system = Some("http://snomed.info/sct".into());
        assert!(!obs.has_code("4548-4"));
        obs.code_system = None;
        assert!(obs.has_code("4548-4"));
    }

    #[test]
    fn condition_label_skips_blank_display() {
        let mut c = fixtures::condition("c", "  ", None);
        c.code = Some("44054006".into());
        assert_eq!(c.label(), Some("44054006"));
    }
}
