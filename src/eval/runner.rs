//! Runs one manifest in one mode.
//!
//! Mock mode is a plain loop; any chart or pipeline error aborts the run.
//! Model mode probes credentials first, bounds every attempt with a worker
//! thread and retries transient failures.

use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use super::gates::evaluate_gates;
use super::manifest::{load_manifest, Manifest, PatientCase};
use super::report::{LlmOutcome, ModeReport, PatientReport, RunHeader};
use super::scoring::{score_result, PatientMetrics};
use super::EvalError;
use crate::analysis::{AnalysisPipeline, PipelineConfig, PipelineError};
use crate::config::{env_lookup, probe_credentials, LlmSettings};
use crate::models::{AnalysisMode, AnalysisResult, ChartSource};
use crate::narrative::{ChatCompletionsClient, LlmClient, ModelNarrative};

pub const DEFAULT_LLM_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_LLM_RETRIES: u32 = 1;

#[derive(Debug, Clone, PartialEq)]
pub struct EvalOptions {
    /// Overrides the manifest's mode.
    pub mode: Option<AnalysisMode>,
    pub require_llm: bool,
    /// Wall-clock bound on one model-mode attempt.
    pub llm_timeout: Duration,
    /// Extra attempts after a transient failure.
    pub llm_retries: u32,
    /// Patient paths are resolved against this directory.
    pub base_dir: PathBuf,
}

impl Default for EvalOptions {
    fn default() -> Self {
        Self {
            mode: None,
            require_llm: false,
            llm_timeout: DEFAULT_LLM_TIMEOUT,
            llm_retries: DEFAULT_LLM_RETRIES,
            base_dir: PathBuf::from("."),
        }
    }
}

type CredentialLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

pub struct EvalRunner {
    charts: Arc<dyn ChartSource>,
    lookup: CredentialLookup,
    model_client: Option<Arc<dyn LlmClient>>,
}

impl EvalRunner {
    pub fn new(charts: Arc<dyn ChartSource>) -> Self {
        Self {
            charts,
            lookup: Arc::new(env_lookup),
            model_client: None,
        }
    }

    /// Read credentials through `lookup` instead of the process environment.
    pub fn with_credentials<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.lookup = Arc::new(lookup);
        self
    }

    /// Use `client` for model mode instead of building one from settings.
    pub fn with_model_client(mut self, client: Arc<dyn LlmClient>) -> Self {
        self.model_client = Some(client);
        self
    }

    pub fn evaluate_path(&self, manifest_path: &Path, options: &EvalOptions) -> Result<ModeReport, EvalError> {
        let manifest = load_manifest(manifest_path)?;
        self.evaluate(&manifest, options)
    }

    pub fn evaluate(&self, manifest: &Manifest, options: &EvalOptions) -> Result<ModeReport, EvalError> {
        let mode = options.mode.or(manifest.mode).unwrap_or_default();
        let header = RunHeader {
            version: manifest.version.clone(),
            mode,
            enable_agents: manifest.enable_agents,
            gates: manifest.gates.clone(),
            require_llm: options.require_llm,
        };
        let config = PipelineConfig {
            mode,
            enable_agents: manifest.enable_agents,
            require_model: mode == AnalysisMode::Llm,
            ..Default::default()
        };
        tracing::info!(mode = %mode, patients = manifest.patients.len(), "Evaluation started");

        let report = match mode {
            AnalysisMode::Mock => self.evaluate_mock(manifest, header, config, options)?,
            AnalysisMode::Llm => self.evaluate_llm(manifest, header, config, options)?,
        };
        tracing::info!(
            mode = %mode,
            overall_pass = report.overall_pass,
            patients_failed = report.patients_failed,
            "Evaluation finished"
        );
        Ok(report)
    }

    fn evaluate_mock(
        &self,
        manifest: &Manifest,
        header: RunHeader,
        config: PipelineConfig,
        options: &EvalOptions,
    ) -> Result<ModeReport, EvalError> {
        let pipeline = AnalysisPipeline::deterministic(config);
        let mut patients = Vec::with_capacity(manifest.patients.len());

        for case in &manifest.patients {
            let path = options.base_dir.join(&case.path);
            let chart = self.charts.load(&path)?;
            let result = pipeline.analyze(&chart, &path.display().to_string())?;
            let metrics = score_result(&result, &case.expects);
            patients.push(scored_patient(case, metrics, &header));
        }
        Ok(ModeReport::assemble(header, patients, 0, None))
    }

    fn evaluate_llm(
        &self,
        manifest: &Manifest,
        header: RunHeader,
        config: PipelineConfig,
        options: &EvalOptions,
    ) -> Result<ModeReport, EvalError> {
        let probe = probe_credentials(&*self.lookup);
        if !probe.is_available() {
            let reason = probe.reason();
            tracing::warn!(reason, "Skipping model evaluation");
            let patients = manifest
                .patients
                .iter()
                .map(|case| {
                    let mut report = PatientReport::unscored(&case.name, &case.path, Some(LlmOutcome::skipped(reason)));
                    report.apply_llm_overrides(options.require_llm);
                    report
                })
                .collect();
            return Ok(ModeReport::assemble(header, patients, 0, Some(reason.to_string())));
        }

        let client: Arc<dyn LlmClient> = match &self.model_client {
            Some(client) => client.clone(),
            None => {
                let settings = LlmSettings::from_lookup(&*self.lookup).map_err(PipelineError::from)?;
                Arc::new(ChatCompletionsClient::new(settings).map_err(PipelineError::from)?)
            }
        };
        let pipeline = Arc::new(AnalysisPipeline::new(config, Arc::new(ModelNarrative::new(client))));

        let mut patients = Vec::with_capacity(manifest.patients.len());
        let mut retried = 0;
        for case in &manifest.patients {
            let (outcome, metrics, retries_used) = self.run_llm_patient(&pipeline, case, options);
            retried += retries_used;

            let mut report = match metrics {
                Some(metrics) => scored_patient(case, metrics, &header),
                None => PatientReport::unscored(&case.name, &case.path, None),
            };
            report.llm = Some(outcome);
            report.apply_llm_overrides(options.require_llm);
            patients.push(report);
        }
        Ok(ModeReport::assemble(header, patients, retried, None))
    }

    fn run_llm_patient(
        &self,
        pipeline: &Arc<AnalysisPipeline>,
        case: &PatientCase,
        options: &EvalOptions,
    ) -> (LlmOutcome, Option<PatientMetrics>, usize) {
        let path = options.base_dir.join(&case.path);
        let attempts = options.llm_retries as usize + 1;
        let mut retries_used = 0;
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.analyze_with_timeout(pipeline, &path, options.llm_timeout) {
                Ok(result) => {
                    return (LlmOutcome::ok(), Some(score_result(&result, &case.expects)), retries_used);
                }
                Err(e) if e.is_transient() && attempt < attempts => {
                    retries_used += 1;
                    tracing::warn!(patient = %case.name, attempt, error = %e, "Model evaluation failed, retrying");
                }
                Err(e) => {
                    tracing::warn!(patient = %case.name, attempt, error = %e, "Model evaluation failed");
                    return (LlmOutcome::failed(e.kind()), None, retries_used);
                }
            }
        }
    }

    /// Run load + analyze on a worker thread and wait at most `timeout`.
    /// A worker that overruns is abandoned, not cancelled.
    fn analyze_with_timeout(
        &self,
        pipeline: &Arc<AnalysisPipeline>,
        path: &Path,
        timeout: Duration,
    ) -> Result<AnalysisResult, EvalError> {
        let (tx, rx) = mpsc::channel();
        let charts = Arc::clone(&self.charts);
        let pipeline = Arc::clone(pipeline);
        let path = path.to_path_buf();

        std::thread::spawn(move || {
            let outcome = charts
                .load(&path)
                .map_err(EvalError::from)
                .and_then(|chart| {
                    pipeline
                        .analyze(&chart, &path.display().to_string())
                        .map_err(EvalError::from)
                });
            // The receiver is gone if the wait already timed out.
            let _ = tx.send(outcome);
        });

        match rx.recv_timeout(timeout) {
            Ok(outcome) => outcome,
            Err(RecvTimeoutError::Timeout) => Err(EvalError::Timeout(timeout.as_secs())),
            Err(RecvTimeoutError::Disconnected) => Err(EvalError::WorkerDisconnected),
        }
    }
}

fn scored_patient(case: &PatientCase, metrics: PatientMetrics, header: &RunHeader) -> PatientReport {
    let gate = evaluate_gates(&metrics, &header.gates);
    tracing::info!(
        patient = %case.name,
        patient_pass = gate.patient_pass,
        failures = gate.failures.len(),
        "Patient scored"
    );
    PatientReport::scored(&case.name, &case.path, metrics, gate.patient_pass, gate.failures)
}
