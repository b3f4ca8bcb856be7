//! Provenance pointers.
//!
//! An [`Evidence`] names exactly one chart item. Its identity (doc_id,
//! resource type, resource id) is fixed at construction; only the file
//! path and timestamp may be attached later by the evidence tracker.
//! Every external encoding goes through [`normalize_evidence`] once, at
//! the boundary, so nothing downstream branches on representation.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::datetime::{deserialize_optional, parse_timestamp};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evidence {
    doc_id: String,
    #[serde(default)]
    resource_type: Option<String>,
    #[serde(default)]
    resource_id: Option<String>,
    #[serde(default)]
    file_path: Option<String>,
    #[serde(default, deserialize_with = "deserialize_optional")]
    timestamp: Option<NaiveDateTime>,
}

impl Evidence {
    /// Pointer to `ResourceType/ResourceId`.
    pub fn new(resource_type: &str, resource_id: &str) -> Self {
        Self {
            doc_id: format!("{resource_type}/{resource_id}"),
            resource_type: Some(resource_type.to_string()),
            resource_id: Some(resource_id.to_string()),
            file_path: None,
            timestamp: None,
        }
    }

    /// Pointer from a doc id. Type and id are split out when the doc id is
    /// a well-formed `ResourceType/ResourceId` reference.
    pub fn from_doc_id(doc_id: &str) -> Self {
        let doc_id = doc_id.trim();
        let (resource_type, resource_id) = split_reference(doc_id)
            .map(|(t, i)| (Some(t.to_string()), Some(i.to_string())))
            .unwrap_or((None, None));
        Self {
            doc_id: doc_id.to_string(),
            resource_type,
            resource_id,
            file_path: None,
            timestamp: None,
        }
    }

    pub fn doc_id(&self) -> &str {
        &self.doc_id
    }

    pub fn resource_type(&self) -> Option<&str> {
        self.resource_type.as_deref()
    }

    pub fn resource_id(&self) -> Option<&str> {
        self.resource_id.as_deref()
    }

    pub fn file_path(&self) -> Option<&str> {
        self.file_path.as_deref()
    }

    pub fn timestamp(&self) -> Option<NaiveDateTime> {
        self.timestamp
    }

    /// `resource_id` when known, else `doc_id`. Used as a sort tie-break.
    pub fn identity(&self) -> &str {
        self.resource_id.as_deref().unwrap_or(&self.doc_id)
    }

    /// A pointer is usable only when it names something.
    pub fn is_identified(&self) -> bool {
        !self.doc_id.trim().is_empty()
            || self.resource_id.as_deref().is_some_and(|id| !id.trim().is_empty())
    }

    pub fn with_file_path(mut self, path: &str) -> Self {
        self.file_path = Some(path.to_string());
        self
    }

    pub fn with_timestamp(mut self, timestamp: NaiveDateTime) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub(crate) fn attach_file_path(&mut self, path: &str) {
        self.file_path = Some(path.to_string());
    }

    pub(crate) fn attach_timestamp(&mut self, timestamp: NaiveDateTime) {
        self.timestamp = Some(timestamp);
    }
}

/// Split `ResourceType/ResourceId` into its halves.
pub fn split_reference(reference: &str) -> Option<(&str, &str)> {
    let (resource_type, resource_id) = reference.split_once('/')?;
    let valid_type = !resource_type.is_empty()
        && resource_type.chars().all(|c| c.is_ascii_alphabetic());
    let valid_id = !resource_id.is_empty() && !resource_id.contains('/');
    (valid_type && valid_id).then_some((resource_type, resource_id))
}

/// Any representation of a provenance pointer found at the system boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EvidenceInput {
    /// A bare `ResourceType/ResourceId` reference.
    Reference(String),
    /// A loose object; any field may be missing.
    Fields(LooseEvidence),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LooseEvidence {
    #[serde(default)]
    pub doc_id: Option<String>,
    #[serde(default)]
    pub resource_type: Option<String>,
    #[serde(default)]
    pub resource_id: Option<String>,
    #[serde(default)]
    pub file_path: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

impl From<Evidence> for EvidenceInput {
    fn from(e: Evidence) -> Self {
        EvidenceInput::Fields(LooseEvidence {
            doc_id: Some(e.doc_id),
            resource_type: e.resource_type,
            resource_id: e.resource_id,
            file_path: e.file_path,
            timestamp: e.timestamp.map(|t| super::datetime::iso_datetime(&t)),
        })
    }
}

impl From<&Evidence> for EvidenceInput {
    fn from(e: &Evidence) -> Self {
        e.clone().into()
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Convert an external evidence encoding into the canonical pointer.
/// Returns `None` when the input identifies nothing.
pub fn normalize_evidence(input: EvidenceInput) -> Option<Evidence> {
    match input {
        EvidenceInput::Reference(reference) => {
            let reference = reference.trim();
            if reference.is_empty() {
                return None;
            }
            Some(Evidence::from_doc_id(reference))
        }
        EvidenceInput::Fields(fields) => {
            let doc_id = non_blank(fields.doc_id);
            let resource_type = non_blank(fields.resource_type);
            let resource_id = non_blank(fields.resource_id);

            let mut evidence = match (doc_id, resource_type, resource_id) {
                (Some(doc_id), resource_type, resource_id) => {
                    let mut e = Evidence::from_doc_id(&doc_id);
                    if resource_type.is_some() {
                        e.resource_type = resource_type;
                    }
                    if resource_id.is_some() {
                        e.resource_id = resource_id;
                    }
                    e
                }
                (None, Some(resource_type), Some(resource_id)) => {
                    Evidence::new(&resource_type, &resource_id)
                }
                (None, None, Some(resource_id)) => Evidence {
                    doc_id: resource_id.clone(),
                    resource_type: None,
                    resource_id: Some(resource_id),
                    file_path: None,
                    timestamp: None,
                },
                (None, _, None) => return None,
            };

            evidence.file_path = non_blank(fields.file_path);
            evidence.timestamp = fields.timestamp.as_deref().and_then(parse_timestamp);
            Some(evidence)
        }
    }
}

/// Normalize a batch, dropping inputs that identify nothing.
pub fn normalize_all<I>(inputs: I) -> Vec<Evidence>
where
    I: IntoIterator<Item = EvidenceInput>,
{
    inputs.into_iter().filter_map(normalize_evidence).collect()
}

/// `deserialize_with` adaptor: chart `sources` arrive in any encoding and
/// are normalized on the way in.
pub fn deserialize_sources<'de, D>(deserializer: D) -> Result<Vec<Evidence>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw: Option<Vec<EvidenceInput>> = Option::deserialize(deserializer)?;
    Ok(raw.map(normalize_all).unwrap_or_default())
}
