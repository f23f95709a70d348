//! Flags conditions whose outcome is known without running the pipeline.

use async_trait::async_trait;
use serde_json::Value;

use brickline_types::{
    contains_template_syntax, ActionCommand, Annotation, AnnotationAction, BrickNode,
    PipelineDocument, Position, Result,
};

use super::{collect, AnalysisPass};
use crate::registry::BrickCatalog;
use crate::traversal::{walk_node, PipelineVisitor, VisitContext};

pub const CONDITION_ANALYSIS_ID: &str = "condition";

const FALSY_STRINGS: &[&str] = &["false", "no", "off", "0"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Blank,
    AlwaysRuns,
    NeverRuns,
}

/// Classify a statically known condition value.
fn classify(value: &Value) -> Option<Outcome> {
    let outcome = match value {
        Value::Null => Outcome::Blank,
        Value::String(s) if s.trim().is_empty() => Outcome::Blank,
        Value::String(s) if contains_template_syntax(s) => return None,
        Value::String(s) => {
            let s = s.trim().to_ascii_lowercase();
            if FALSY_STRINGS.contains(&s.as_str()) {
                Outcome::NeverRuns
            } else {
                Outcome::AlwaysRuns
            }
        }
        Value::Bool(false) => Outcome::NeverRuns,
        Value::Number(n) if n.as_f64() == Some(0.0) => Outcome::NeverRuns,
        _ => Outcome::AlwaysRuns,
    };
    Some(outcome)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ConditionAnalysis;

#[async_trait]
impl AnalysisPass for ConditionAnalysis {
    fn id(&self) -> &str {
        CONDITION_ANALYSIS_ID
    }

    async fn analyze(
        &self,
        document: &PipelineDocument,
        catalog: &BrickCatalog,
    ) -> Result<Vec<Annotation>> {
        Ok(collect(ConditionVisitor::default(), document, catalog).annotations)
    }
}

#[derive(Default)]
struct ConditionVisitor {
    annotations: Vec<Annotation>,
}

impl ConditionVisitor {
    fn check(&mut self, position: &Position, node: &BrickNode) {
        let Some(value) = node.condition.as_ref().and_then(|c| c.static_value()) else {
            return;
        };
        let condition_position = position.child("if");
        let annotation = match classify(&value) {
            None => return,
            Some(Outcome::Blank) => Annotation::warning(
                CONDITION_ANALYSIS_ID,
                condition_position.clone(),
                "Condition is blank; the brick will always run",
            )
            .with_action(AnnotationAction::new(
                "Remove condition",
                ActionCommand::UnsetValue {
                    path: condition_position,
                },
            )),
            Some(Outcome::AlwaysRuns) => Annotation::info(
                CONDITION_ANALYSIS_ID,
                condition_position,
                "Condition is a constant truthy value; the brick will always run",
            ),
            Some(Outcome::NeverRuns) => Annotation::info(
                CONDITION_ANALYSIS_ID,
                condition_position,
                "Condition is a constant falsy value; the brick will never run",
            ),
        };
        self.annotations.push(annotation);
    }
}

impl PipelineVisitor for ConditionVisitor {
    fn visit_node(&mut self, position: &Position, node: &BrickNode, ctx: &VisitContext<'_>) {
        self.check(position, node);
        walk_node(self, position, node, ctx);
    }
}
