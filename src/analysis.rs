//! Per-chart analysis pipeline.
//!
//! rules → snapshot → detector agents → evidence enrichment → narrative →
//! verifier. The narrative provider is chosen once when the pipeline is
//! built; nothing here reads the environment.

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;
use uuid::Uuid;

use crate::agents::{run_agents, verify_result, DEFAULT_MAX_ENTRIES};
use crate::config::LlmSettings;
use crate::evidence_tracker::enrich_result_evidence;
use crate::models::{AnalysisMode, AnalysisResult, Chart};
use crate::narrative::{
    ChatCompletionsClient, DeterministicNarrative, LlmError, ModelNarrative, NarrativeError, NarrativeProvider,
};
use crate::rules::RuleEngine;
use crate::snapshot::build_snapshot;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Narrative generation failed: {0}")]
    Narrative(#[from] NarrativeError),

    #[error("Narrative backend unavailable: {0}")]
    Backend(#[from] LlmError),
}

impl PipelineError {
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Narrative(e) => e.is_transient(),
            Self::Backend(e) => e.is_transient(),
        }
    }

    /// Short type name used in eval failure reasons.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Narrative(NarrativeError::Llm(e)) | Self::Backend(e) => match e {
                LlmError::MissingCredentials(_) => "MissingCredentials",
                LlmError::Timeout { .. } => "Timeout",
                LlmError::Connection { .. } => "ConnectionError",
                LlmError::RateLimited { .. } => "RateLimited",
                LlmError::Http { .. } => "HttpError",
                LlmError::InvalidResponse(_) => "InvalidResponse",
                LlmError::Client(_) => "ClientError",
            },
            Self::Narrative(_) => "GroundingViolation",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub mode: AnalysisMode,
    pub enable_agents: bool,
    /// Fail instead of falling back to the deterministic narrative.
    pub require_model: bool,
    /// Record per-rule abstention/failure reasons in `meta`.
    pub rule_debug: bool,
    pub max_timeline_entries: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            mode: AnalysisMode::Mock,
            enable_agents: true,
            require_model: false,
            rule_debug: false,
            max_timeline_entries: DEFAULT_MAX_ENTRIES,
        }
    }
}

pub struct AnalysisPipeline {
    config: PipelineConfig,
    engine: RuleEngine,
    provider: Arc<dyn NarrativeProvider>,
}

impl AnalysisPipeline {
    pub fn new(config: PipelineConfig, provider: Arc<dyn NarrativeProvider>) -> Self {
        let engine = RuleEngine::new(config.rule_debug);
        Self {
            config,
            engine,
            provider,
        }
    }

    /// Pipeline with the deterministic narrative only.
    pub fn deterministic(config: PipelineConfig) -> Self {
        Self::new(config, Arc::new(DeterministicNarrative))
    }

    /// Pipeline for `config.mode`; model mode needs resolved settings.
    pub fn for_mode(config: PipelineConfig, settings: Option<LlmSettings>) -> Result<Self, PipelineError> {
        match config.mode {
            AnalysisMode::Mock => Ok(Self::deterministic(config)),
            AnalysisMode::Llm => {
                let settings = settings.ok_or_else(|| {
                    LlmError::MissingCredentials(crate::config::LLM_SKIP_MESSAGE.to_string())
                })?;
                let client = ChatCompletionsClient::new(settings)?;
                Ok(Self::new(config, Arc::new(ModelNarrative::new(Arc::new(client)))))
            }
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn analyze(&self, chart: &Chart, source_path: &str) -> Result<AnalysisResult, PipelineError> {
        let run_id = Uuid::new_v4();
        let rules = self.engine.run(chart);
        let snapshot = build_snapshot(chart, &rules.findings);

        let mut meta = BTreeMap::new();
        meta.insert("patient_id".to_string(), chart.patient_id.clone());
        meta.insert("source_path".to_string(), source_path.to_string());
        meta.insert("mode".to_string(), self.config.mode.to_string());
        meta.insert("run_id".to_string(), run_id.to_string());
        for (rule_id, reason) in rules.diagnostics {
            meta.insert(format!("rule_debug.{rule_id}"), reason);
        }

        let mut result = AnalysisResult {
            snapshot: Some(snapshot.text),
            snapshot_evidence: snapshot.evidence,
            risks: rules.findings,
            meta,
            ..Default::default()
        };

        if self.config.enable_agents {
            let agents = run_agents(chart, self.config.max_timeline_entries);
            result.timeline = Some(agents.timeline);
            result.missing_info = Some(agents.missing_info);
            result.contradictions = Some(agents.contradictions);
        }

        enrich_result_evidence(&mut result, chart, source_path);

        let snapshot_text = result.snapshot.clone().unwrap_or_default();
        let narrative = match self.provider.generate(&snapshot_text, &chart.patient_id) {
            Ok(narrative) => {
                result.meta.insert("narrative".into(), self.provider.name().into());
                narrative
            }
            Err(e) if self.config.require_model => {
                tracing::error!(patient_id = %chart.patient_id, error = %e, "Narrative failed and fallback is disabled");
                return Err(e.into());
            }
            Err(e) => {
                tracing::warn!(
                    patient_id = %chart.patient_id,
                    provider = self.provider.name(),
                    error = %e,
                    "Narrative failed, falling back to deterministic"
                );
                result.meta.insert("narrative".into(), DeterministicNarrative.name().into());
                result.meta.insert("narrative_fallback".into(), e.to_string());
                DeterministicNarrative::summarize(&snapshot_text, &chart.patient_id)
            }
        };
        result.narrative = Some(narrative);

        let report = verify_result(&mut result);
        tracing::info!(
            patient_id = %chart.patient_id,
            run_id = %run_id,
            risks = result.risks.len(),
            narrative = result.narrative.is_some(),
            verified_clean = report.is_clean(),
            "Analysis complete"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::chart::fixtures;
    use crate::narrative::MockLlmClient;
    use crate::rules::lab_a1c::A1C_CODE;

    fn a1c_chart() -> Chart {
        let mut chart = fixtures::chart();
        chart.conditions = vec![fixtures::condition("c1", "Diabetes mellitus type 2", Some("2015-03-01"))];
        chart.observations = vec![fixtures::observation("a1", A1C_CODE, Some(7.2), Some("%"), Some("2024-02-10"))];
        chart
    }

    fn model_pipeline(reply: MockLlmClient, require_model: bool) -> AnalysisPipeline {
        let config = PipelineConfig {
            mode: AnalysisMode::Llm,
            require_model,
            ..Default::default()
        };
        AnalysisPipeline::new(config, Arc::new(ModelNarrative::new(Arc::new(reply))))
    }

    #[test]
    fn deterministic_run_is_fully_grounded() {
        let pipeline = AnalysisPipeline::deterministic(PipelineConfig::default());
        let result = pipeline.analyze(&a1c_chart(), "charts/p1.json").unwrap();

        assert_eq!(result.risks.len(), 1);
        assert_eq!(result.risks[0].rule_id, "lab_a1c_elevated");
        assert!(result.narrative.is_some(), "deterministic narrative must survive verification");
        assert!(result.timeline.is_some());
        assert_eq!(result.meta["mode"], "mock");
        assert_eq!(result.meta["narrative"], "deterministic");
        assert!(Uuid::parse_str(&result.meta["run_id"]).is_ok());
        assert_eq!(result.risks[0].evidence[0].file_path(), Some("charts/p1.json"));
        assert!(result.risks[0].evidence[0].timestamp().is_some());
    }

    #[test]
    fn agents_are_absent_when_disabled() {
        let config = PipelineConfig {
            enable_agents: false,
            ..Default::default()
        };
        let result = AnalysisPipeline::deterministic(config).analyze(&a1c_chart(), "p.json").unwrap();
        assert!(result.timeline.is_none());
        assert!(result.missing_info.is_none());
        assert!(result.contradictions.is_none());
    }

    #[test]
    fn rule_debug_reasons_land_in_meta() {
        let config = PipelineConfig {
            rule_debug: true,
            ..Default::default()
        };
        let result = AnalysisPipeline::deterministic(config).analyze(&a1c_chart(), "p.json").unwrap();
        assert_eq!(result.meta["rule_debug.vitals_bmi_obesity"], "no BMI obs");
        assert!(!result.meta.contains_key("rule_debug.lab_a1c_elevated"));
    }

    #[test]
    fn contract_violation_falls_back_when_allowed() {
        let pipeline = model_pipeline(MockLlmClient::new("not json"), false);
        let result = pipeline.analyze(&a1c_chart(), "p.json").unwrap();
        assert_eq!(result.meta["narrative"], "deterministic");
        assert!(result.meta["narrative_fallback"].contains("non-JSON"));
        assert!(result.narrative.is_some());
    }

    #[test]
    fn contract_violation_fails_when_model_required() {
        let pipeline = model_pipeline(MockLlmClient::new("not json"), true);
        let err = pipeline.analyze(&a1c_chart(), "p.json").unwrap_err();
        assert_eq!(err.kind(), "GroundingViolation");
        assert!(!err.is_transient());
    }

    #[test]
    fn fabricated_model_citation_is_dropped_by_verifier() {
        let reply = r#"{"patient_id":"patient-1","summary_bullets":["- Diabetes. [S1]"],"risk_bullets":[],"followup_questions":[],"citations":{"S1":["Condition/not-in-chart"]}}"#;
        let pipeline = model_pipeline(MockLlmClient::new(reply), true);
        let result = pipeline.analyze(&a1c_chart(), "p.json").unwrap();
        assert_eq!(result.meta["narrative"], "llm");
        assert!(result.narrative.is_none());
        assert_eq!(result.risks.len(), 1);
    }

    #[test]
    fn model_mode_without_settings_is_an_error() {
        let config = PipelineConfig {
            mode: AnalysisMode::Llm,
            ..Default::default()
        };
        let err = AnalysisPipeline::for_mode(config, None).err().unwrap();
        assert_eq!(err.kind(), "MissingCredentials");
    }
}
