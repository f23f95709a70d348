//! Checks literal patterns given to the regex extractor brick.

use async_trait::async_trait;
use regex::Regex;

use brickline_types::{Annotation, BrickNode, PipelineDocument, Position, Result};

use super::{collect, AnalysisPass};
use crate::registry::BrickCatalog;
use crate::traversal::{walk_node, PipelineVisitor, VisitContext};

pub const REGEX_ANALYSIS_ID: &str = "regex";

const PATTERN_PROPERTY: &str = "regex";

#[derive(Debug, Clone)]
pub struct RegexAnalysis {
    brick_id: String,
}

impl RegexAnalysis {
    pub fn new(brick_id: impl Into<String>) -> Self {
        Self {
            brick_id: brick_id.into(),
        }
    }
}

#[async_trait]
impl AnalysisPass for RegexAnalysis {
    fn id(&self) -> &str {
        REGEX_ANALYSIS_ID
    }

    async fn analyze(
        &self,
        document: &PipelineDocument,
        catalog: &BrickCatalog,
    ) -> Result<Vec<Annotation>> {
        let visitor = RegexVisitor {
            brick_id: &self.brick_id,
            annotations: Vec::new(),
        };
        Ok(collect(visitor, document, catalog).annotations)
    }
}

struct RegexVisitor<'a> {
    brick_id: &'a str,
    annotations: Vec<Annotation>,
}

impl RegexVisitor<'_> {
    fn check(&mut self, position: &Position, node: &BrickNode) {
        let Some(pattern) = node
            .config
            .get(PATTERN_PROPERTY)
            .and_then(|expr| expr.static_value())
        else {
            return;
        };
        let Some(pattern) = pattern.as_str() else {
            return;
        };
        let pattern_position = position.config_field(PATTERN_PROPERTY);

        match Regex::new(pattern) {
            Err(err) => self.annotations.push(
                Annotation::error(REGEX_ANALYSIS_ID, pattern_position, err.to_string())
                    .with_detail(serde_json::json!({ "pattern": pattern })),
            ),
            Ok(compiled) if compiled.capture_names().flatten().next().is_none() => {
                self.annotations.push(Annotation::warning(
                    REGEX_ANALYSIS_ID,
                    pattern_position,
                    "Expected the pattern to define at least one named capture group: (?P<name>...)",
                ))
            }
            Ok(_) => {}
        }
    }
}

impl PipelineVisitor for RegexVisitor<'_> {
    fn visit_node(&mut self, position: &Position, node: &BrickNode, ctx: &VisitContext<'_>) {
        if node.id == self.brick_id {
            self.check(position, node);
        }
        walk_node(self, position, node, ctx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::passes::test_support::run;
    use crate::registry::REGEX_BRICK_ID;
    use brickline_types::{Expression, Severity};

    async fn annotations_for(pattern: Expression) -> Vec<Annotation> {
        let doc = PipelineDocument::new(vec![BrickNode::new(REGEX_BRICK_ID)
            .with_output_key("match")
            .with_config("regex", pattern)]);
        run(&RegexAnalysis::new(REGEX_BRICK_ID), &doc).await
    }

    #[tokio::test]
    async fn invalid_pattern_is_error() {
        let anns = annotations_for(Expression::literal("(unclosed")).await;
        assert_eq!(anns.len(), 1);
        assert_eq!(anns[0].severity, Severity::Error);
        assert_eq!(anns[0].position.path(), "pipeline.0.config.regex");
        assert!(!anns[0].message.is_empty());
    }

    #[tokio::test]
    async fn pattern_without_named_group_warns() {
        let anns = annotations_for(Expression::literal(r"(\d+)-(\d+)")).await;
        assert_eq!(anns.len(), 1);
        assert_eq!(anns[0].severity, Severity::Warning);
    }

    #[tokio::test]
    async fn named_group_is_clean() {
        assert!(annotations_for(Expression::literal(r"(?P<year>\d{4})"))
            .await
            .is_empty());
        assert!(annotations_for(Expression::nunjucks(r"(?<year>\d{4})"))
            .await
            .is_empty());
    }

    #[tokio::test]
    async fn dynamic_pattern_skipped() {
        assert!(annotations_for(Expression::var("@input.pattern")).await.is_empty());
        assert!(annotations_for(Expression::nunjucks("{{ @input.pattern }}"))
            .await
            .is_empty());
    }

    #[tokio::test]
    async fn other_bricks_ignored() {
        let doc = PipelineDocument::new(vec![
            BrickNode::new("@test/other").with_config("regex", Expression::literal("(")),
        ]);
        assert!(run(&RegexAnalysis::new(REGEX_BRICK_ID), &doc).await.is_empty());
    }
}
