//! Model-backed narrative and the citation contract its replies must meet.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, LazyLock};

use regex::Regex;

use super::client::LlmClient;
use super::prompt::build_prompt;
use super::{NarrativeError, NarrativeProvider, RAW_PREVIEW_LEN};
use crate::models::NarrativeSummary;

static ANY_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[[^\]]+\]").expect("valid tag pattern"));
static CITATION_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[(?:S|R)\d+\]").expect("valid citation tag pattern"));
static DOC_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z]+/[A-Za-z0-9\-\.]+$").expect("valid doc id pattern"));

fn raw_preview(raw: &str) -> String {
    raw.chars().take(RAW_PREVIEW_LEN).collect()
}

fn is_valid_doc_id(value: &str) -> bool {
    !value.contains("...") && DOC_ID.is_match(value)
}

/// Parse and check a raw model reply.
///
/// Checks run in order and the first violation wins: JSON shape, tags in
/// follow-up questions, bullet tags without a citations entry, malformed
/// citation values.
pub fn validate_narrative(raw: &str) -> Result<NarrativeSummary, NarrativeError> {
    let narrative: NarrativeSummary =
        serde_json::from_str(raw.trim()).map_err(|e| NarrativeError::InvalidJson {
            detail: e.to_string(),
            preview: raw_preview(raw),
        })?;

    let followup_tags: Vec<String> = narrative
        .followup_questions
        .iter()
        .flat_map(|q| ANY_TAG.find_iter(q).map(|m| m.as_str().to_string()))
        .collect();
    if !followup_tags.is_empty() {
        return Err(NarrativeError::TaggedFollowups {
            tags: followup_tags,
            preview: raw_preview(raw),
        });
    }

    let missing: BTreeSet<String> = narrative
        .summary_bullets
        .iter()
        .chain(&narrative.risk_bullets)
        .flat_map(|b| CITATION_TAG.find_iter(b))
        .map(|m| m.as_str().trim_matches(|c| c == '[' || c == ']').to_string())
        .filter(|tag| !narrative.citations.contains_key(tag))
        .collect();
    if !missing.is_empty() {
        return Err(NarrativeError::MissingCitationKeys {
            tags: missing.into_iter().collect(),
            preview: raw_preview(raw),
        });
    }

    let invalid: BTreeMap<String, Vec<String>> = narrative
        .citations
        .iter()
        .filter_map(|(tag, values)| {
            let bad: Vec<String> = values.iter().filter(|v| !is_valid_doc_id(v)).cloned().collect();
            (!bad.is_empty()).then(|| (tag.clone(), bad))
        })
        .collect();
    if !invalid.is_empty() {
        return Err(NarrativeError::InvalidCitations {
            invalid,
            preview: raw_preview(raw),
        });
    }

    Ok(narrative)
}

/// Narrative from one chat-model call per snapshot.
pub struct ModelNarrative {
    client: Arc<dyn LlmClient>,
}

impl ModelNarrative {
    pub fn new(client: Arc<dyn LlmClient>) -> Self {
        Self { client }
    }
}

impl NarrativeProvider for ModelNarrative {
    fn name(&self) -> &'static str {
        "llm"
    }

    fn generate(&self, snapshot: &str, patient_id: &str) -> Result<NarrativeSummary, NarrativeError> {
        let raw = self.client.complete(&build_prompt(snapshot))?;
        let mut narrative = validate_narrative(&raw)?;
        if narrative.patient_id.trim().is_empty() {
            narrative.patient_id = patient_id.to_string();
        }
        tracing::debug!(
            patient_id,
            summary = narrative.summary_bullets.len(),
            risks = narrative.risk_bullets.len(),
            "Model narrative accepted"
        );
        Ok(narrative)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::narrative::client::{LlmError, MockLlmClient};

    const GOOD: &str = r#"{"patient_id":"p1","summary_bullets":["- Diabetes documented. [S1]"],"risk_bullets":["- A1c elevated. [R1]"],"followup_questions":["- Any new symptoms?"],"citations":{"S1":["Condition/c1"],"R1":["Observation/a1"]}}"#;

    #[test]
    fn accepts_well_formed_reply() {
        let narrative = validate_narrative(GOOD).unwrap();
        assert_eq!(narrative.patient_id, "p1");
        assert_eq!(narrative.citations["R1"], vec!["Observation/a1".to_string()]);
    }

    #[test]
    fn rejects_prose_with_preview() {
        let raw = format!("Sure! Here is the summary: {}", "x".repeat(2000));
        let err = validate_narrative(&raw).unwrap_err();
        assert!(matches!(err, NarrativeError::InvalidJson { .. }));
        assert!(err.is_contract_violation());
        assert_eq!(err.preview().map(|p| p.chars().count()), Some(RAW_PREVIEW_LEN));
    }

    #[test]
    fn rejects_unknown_fields() {
        let raw = GOOD.replacen("{", r#"{"notes":"extra","#, 1);
        assert!(matches!(validate_narrative(&raw), Err(NarrativeError::InvalidJson { .. })));
    }

    #[test]
    fn rejects_tagged_followups() {
        let raw = GOOD.replace("Any new symptoms?", "Any new symptoms? [S1]");
        match validate_narrative(&raw) {
            Err(NarrativeError::TaggedFollowups { tags, .. }) => assert_eq!(tags, vec!["[S1]".to_string()]),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn rejects_bullet_tags_without_citations() {
        let raw = GOOD.replace(r#""R1":["Observation/a1"]"#, r#""R2":["Observation/a1"]"#);
        match validate_narrative(&raw) {
            Err(NarrativeError::MissingCitationKeys { tags, .. }) => assert_eq!(tags, vec!["R1".to_string()]),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn rejects_ellipsis_and_free_text_citations() {
        let raw = GOOD
            .replace("Observation/a1", "Observation/...")
            .replace("Condition/c1", "the problem list");
        match validate_narrative(&raw) {
            Err(NarrativeError::InvalidCitations { invalid, .. }) => {
                assert_eq!(invalid.len(), 2);
                assert_eq!(invalid["S1"], vec!["the problem list".to_string()]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn empty_citation_lists_are_allowed() {
        let raw = r#"{"patient_id":"p1","summary_bullets":["- not documented in provided record"],"risk_bullets":[],"followup_questions":[],"citations":{"S1":[]}}"#;
        assert!(validate_narrative(raw).is_ok());
    }

    #[test]
    fn provider_surfaces_transport_errors() {
        let client = Arc::new(MockLlmClient::failing(LlmError::Timeout {
            url: "u".into(),
            secs: 30,
        }));
        let provider = ModelNarrative::new(client.clone());
        let err = provider.generate("snapshot", "p1").unwrap_err();
        assert!(err.is_transient());
        assert!(!err.is_contract_violation());
        assert_eq!(client.calls(), 1);
    }

    #[test]
    fn provider_fills_blank_patient_id() {
        let raw = GOOD.replace(r#""patient_id":"p1""#, r#""patient_id":"""#);
        let provider = ModelNarrative::new(Arc::new(MockLlmClient::new(&raw)));
        assert_eq!(provider.generate("snapshot", "p9").unwrap().patient_id, "p9");
    }
}
