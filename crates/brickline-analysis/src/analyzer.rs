//! Runs the variable analysis and every enabled pass over one document.

use std::collections::BTreeSet;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;

use futures::FutureExt;
use serde::{Deserialize, Serialize};

use brickline_types::{
    Annotation, BricklineError, PipelineDocument, Position, Result, Severity, TraceRecord,
};

use crate::passes::{
    AnalysisPass, BrickTypeAnalysis, ConditionAnalysis, OutputKeyAnalysis, PermissionOracle,
    RegexAnalysis, RendererAnalysis, RequestPermissionAnalysis, TemplateAnalysis, TraceAnalysis,
};
use crate::registry::{BrickCatalog, BrickRegistry, HTTP_BRICK_ID, REGEX_BRICK_ID};
use crate::var_analysis::{SnapshotMap, VarAnalysis, VAR_ANALYSIS_ID};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AnalysisConfig {
    /// Pass ids to skip, e.g. `["trace", "template"]`.
    pub disabled_passes: BTreeSet<String>,
    pub http_brick_id: String,
    pub regex_brick_id: String,
    /// Warn about variable references that might not be defined.
    pub check_variables: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            disabled_passes: BTreeSet::new(),
            http_brick_id: HTTP_BRICK_ID.to_string(),
            regex_brick_id: REGEX_BRICK_ID.to_string(),
            check_variables: true,
        }
    }
}

impl AnalysisConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn is_enabled(&self, pass_id: &str) -> bool {
        !self.disabled_passes.contains(pass_id)
    }

    pub fn disable(mut self, pass_id: impl Into<String>) -> Self {
        self.disabled_passes.insert(pass_id.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisReport {
    pub annotations: Vec<Annotation>,
    pub snapshots: SnapshotMap,
    /// Ids of passes that failed and contributed nothing.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failed_passes: Vec<String>,
}

impl AnalysisReport {
    pub fn errors(&self) -> impl Iterator<Item = &Annotation> {
        self.annotations
            .iter()
            .filter(|a| a.severity == Severity::Error)
    }

    pub fn has_errors(&self) -> bool {
        self.errors().next().is_some()
    }

    pub fn annotations_at(&self, position: &Position) -> impl Iterator<Item = &Annotation> + '_ {
        let position = position.clone();
        self.annotations.iter().filter(move |a| a.position == position)
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.annotations
            .iter()
            .filter(|a| a.severity == severity)
            .count()
    }
}

// ---------------------------------------------------------------------------
// Analyzer
// ---------------------------------------------------------------------------

pub struct Analyzer {
    registry: Arc<dyn BrickRegistry>,
    oracle: Option<Arc<dyn PermissionOracle>>,
    traces: Vec<TraceRecord>,
    config: AnalysisConfig,
    extra_passes: Vec<Box<dyn AnalysisPass>>,
}

impl Analyzer {
    pub fn new(registry: Arc<dyn BrickRegistry>) -> Self {
        Self {
            registry,
            oracle: None,
            traces: Vec::new(),
            config: AnalysisConfig::default(),
            extra_passes: Vec::new(),
        }
    }

    pub fn with_oracle(mut self, oracle: Arc<dyn PermissionOracle>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    pub fn with_traces(mut self, traces: Vec<TraceRecord>) -> Self {
        self.traces = traces;
        self
    }

    pub fn with_config(mut self, config: AnalysisConfig) -> Self {
        self.config = config;
        self
    }

    /// Run an additional pass after the built-in ones.
    pub fn with_pass(mut self, pass: Box<dyn AnalysisPass>) -> Self {
        self.extra_passes.push(pass);
        self
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    fn builtin_passes(&self) -> Vec<Box<dyn AnalysisPass>> {
        let mut passes: Vec<Box<dyn AnalysisPass>> = vec![
            Box::new(ConditionAnalysis),
            Box::new(OutputKeyAnalysis),
            Box::new(RendererAnalysis),
            Box::new(BrickTypeAnalysis),
            Box::new(RegexAnalysis::new(self.config.regex_brick_id.clone())),
            Box::new(TemplateAnalysis),
            Box::new(RequestPermissionAnalysis::new(
                self.oracle.clone(),
                self.config.http_brick_id.clone(),
            )),
        ];
        if !self.traces.is_empty() {
            passes.push(Box::new(TraceAnalysis::new(&self.traces)));
        }
        passes
    }

    /// Resolve every brick id in the document in one registry call. A failed
    /// lookup degrades to an empty catalog.
    pub async fn resolve(&self, document: &PipelineDocument) -> BrickCatalog {
        let ids = document.brick_ids();
        match self.registry.resolve_all(&ids).await {
            Ok(catalog) => {
                if catalog.len() < ids.len() {
                    tracing::debug!(
                        requested = ids.len(),
                        resolved = catalog.len(),
                        "Some bricks could not be resolved"
                    );
                }
                catalog
            }
            Err(err) => {
                tracing::warn!(error = %err, "Registry lookup failed; analyzing without brick metadata");
                BrickCatalog::new()
            }
        }
    }

    pub async fn analyze(&self, document: &PipelineDocument) -> AnalysisReport {
        let catalog = self.resolve(document).await;
        let mut report = AnalysisReport::default();

        if self.config.is_enabled(VAR_ANALYSIS_ID) {
            let vars = VarAnalysis::new().with_reference_checks(self.config.check_variables);
            match std::panic::catch_unwind(AssertUnwindSafe(|| vars.run(document, &catalog))) {
                Ok(output) => {
                    report.snapshots = output.snapshots;
                    report.annotations.extend(output.annotations);
                }
                Err(panic) => {
                    tracing::warn!(pass = VAR_ANALYSIS_ID, reason = %panic_message(&*panic), "Analysis pass panicked");
                    report.failed_passes.push(VAR_ANALYSIS_ID.to_string());
                }
            }
        }

        let passes = self.builtin_passes();
        for pass in passes.iter().chain(self.extra_passes.iter()) {
            let id = pass.id();
            if !self.config.is_enabled(id) {
                tracing::debug!(pass = id, "Pass disabled");
                continue;
            }
            match run_isolated(pass.as_ref(), document, &catalog).await {
                Ok(annotations) => {
                    tracing::debug!(pass = id, count = annotations.len(), "Pass complete");
                    report.annotations.extend(annotations);
                }
                Err(err) => {
                    tracing::warn!(pass = id, error = %err, "Analysis pass failed");
                    report.failed_passes.push(id.to_string());
                }
            }
        }

        tracing::info!(
            annotations = report.annotations.len(),
            errors = report.count(Severity::Error),
            failed = report.failed_passes.len(),
            "Analysis complete"
        );
        report
    }

    /// Like [`analyze`](Self::analyze), but fails if any Error-severity
    /// annotation was produced.
    pub async fn analyze_or_raise(&self, document: &PipelineDocument) -> Result<AnalysisReport> {
        let report = self.analyze(document).await;
        let errors: Vec<String> = report
            .errors()
            .map(|a| format!("{}: {}", a.position, a.message))
            .collect();
        if errors.is_empty() {
            Ok(report)
        } else {
            Err(BricklineError::ValidationError(errors.join("; ")))
        }
    }
}

/// Run one pass behind both an error and a panic boundary.
async fn run_isolated(
    pass: &dyn AnalysisPass,
    document: &PipelineDocument,
    catalog: &BrickCatalog,
) -> Result<Vec<Annotation>> {
    match AssertUnwindSafe(pass.analyze(document, catalog))
        .catch_unwind()
        .await
    {
        Ok(result) => result,
        Err(panic) => Err(BricklineError::PassFailed {
            pass: pass.id().to_string(),
            message: panic_message(&*panic),
        }),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn config_defaults_and_json() {
        let config: AnalysisConfig =
            serde_json::from_value(json!({"disabledPasses": ["trace"], "checkVariables": false}))
                .unwrap();
        assert!(!config.is_enabled("trace"));
        assert!(config.is_enabled("renderer"));
        assert!(!config.check_variables);
        assert_eq!(config.http_brick_id, HTTP_BRICK_ID);
    }

    #[test]
    fn builtin_pass_ids_are_unique() {
        let analyzer = Analyzer::new(Arc::new(crate::registry::builtin_registry()))
            .with_traces(vec![TraceRecord::success(uuid::Uuid::nil())]);
        let mut ids: Vec<_> = analyzer
            .builtin_passes()
            .iter()
            .map(|p| p.id().to_string())
            .collect();
        let total = ids.len();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), total);
        assert!(ids.iter().any(|id| id == "requestPermissions"));
        assert!(ids.iter().any(|id| id == "trace"));
    }

    #[test]
    fn annotations_at_outlives_position_argument() {
        let report = AnalysisReport {
            annotations: vec![
                Annotation::error("a", "pipeline.0".parse().unwrap(), "first"),
                Annotation::warning("b", "pipeline.1".parse().unwrap(), "second"),
            ],
            ..AnalysisReport::default()
        };
        let found: Vec<_> = report
            .annotations_at(&"pipeline.1".parse::<Position>().unwrap())
            .collect();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].message, "second");
        assert!(report.has_errors());
    }

    #[test]
    fn panic_messages() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(&*payload), "boom");
        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(&*payload), "bang");
        let payload: Box<dyn std::any::Any + Send> = Box::new(42);
        assert_eq!(panic_message(&*payload), "panic");
    }
}
