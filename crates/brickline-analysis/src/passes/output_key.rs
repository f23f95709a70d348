//! Output-key rules by brick category.

use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;

use brickline_types::{
    ActionCommand, Annotation, AnnotationAction, BrickCategory, BrickNode, PipelineDocument,
    Position, Result,
};

use super::{collect, AnalysisPass};
use crate::registry::BrickCatalog;
use crate::traversal::{walk_node, PipelineVisitor, VisitContext};

pub const OUTPUT_KEY_ANALYSIS_ID: &str = "outputKey";

fn output_key_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z][0-9A-Za-z]*$").unwrap())
}

/// Whether `key` is a legal output key.
pub fn is_valid_output_key(key: &str) -> bool {
    output_key_pattern().is_match(key)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct OutputKeyAnalysis;

#[async_trait]
impl AnalysisPass for OutputKeyAnalysis {
    fn id(&self) -> &str {
        OUTPUT_KEY_ANALYSIS_ID
    }

    async fn analyze(
        &self,
        document: &PipelineDocument,
        catalog: &BrickCatalog,
    ) -> Result<Vec<Annotation>> {
        Ok(collect(OutputKeyVisitor::default(), document, catalog).annotations)
    }
}

#[derive(Default)]
struct OutputKeyVisitor {
    annotations: Vec<Annotation>,
}

impl OutputKeyVisitor {
    fn check(&mut self, position: &Position, node: &BrickNode, category: BrickCategory) {
        let key_position = position.child("outputKey");
        let key = node.output_key.as_deref().filter(|k| !k.is_empty());

        if !category.produces_output() {
            if key.is_some() {
                self.annotations.push(
                    Annotation::error(
                        OUTPUT_KEY_ANALYSIS_ID,
                        key_position.clone(),
                        format!("{} bricks must not have an output key", capitalized(category)),
                    )
                    .with_action(AnnotationAction::new(
                        "Remove output key",
                        ActionCommand::UnsetValue { path: key_position },
                    )),
                );
            }
            return;
        }

        let Some(key) = key else {
            self.annotations.push(Annotation::error(
                OUTPUT_KEY_ANALYSIS_ID,
                key_position,
                match category {
                    BrickCategory::Reader => "Reader bricks must have an output key to store the data they read",
                    _ => "Transform bricks must have an output key to store their result",
                },
            ));
            return;
        };

        if !is_valid_output_key(key) {
            self.annotations.push(
                Annotation::error(
                    OUTPUT_KEY_ANALYSIS_ID,
                    key_position,
                    format!(
                        "Invalid output key \"{key}\": must start with a letter and contain only letters and digits"
                    ),
                )
                .with_detail(serde_json::json!({ "outputKey": key })),
            );
        }
    }
}

fn capitalized(category: BrickCategory) -> &'static str {
    match category {
        BrickCategory::Reader => "Reader",
        BrickCategory::Transform => "Transform",
        BrickCategory::Effect => "Effect",
        BrickCategory::Renderer => "Renderer",
    }
}

impl PipelineVisitor for OutputKeyVisitor {
    fn visit_node(&mut self, position: &Position, node: &BrickNode, ctx: &VisitContext<'_>) {
        match ctx.definition(node) {
            Some(definition) => self.check(position, node, definition.category),
            None => tracing::debug!(brick = %node.id, position = %position, "Skipping output key check for unresolved brick"),
        }
        walk_node(self, position, node, ctx);
    }
}
