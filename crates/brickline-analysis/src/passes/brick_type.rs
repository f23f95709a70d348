//! Brick categories that the enclosing flavor forbids.

use async_trait::async_trait;

use brickline_types::{Annotation, BrickNode, PipelineDocument, Position, Result};

use super::{collect, AnalysisPass};
use crate::registry::BrickCatalog;
use crate::traversal::{walk_node, PipelineVisitor, VisitContext};

pub const BRICK_TYPE_ANALYSIS_ID: &str = "brickType";

#[derive(Debug, Clone, Copy, Default)]
pub struct BrickTypeAnalysis;

#[async_trait]
impl AnalysisPass for BrickTypeAnalysis {
    fn id(&self) -> &str {
        BRICK_TYPE_ANALYSIS_ID
    }

    async fn analyze(
        &self,
        document: &PipelineDocument,
        catalog: &BrickCatalog,
    ) -> Result<Vec<Annotation>> {
        Ok(collect(BrickTypeVisitor::default(), document, catalog).annotations)
    }
}

#[derive(Default)]
struct BrickTypeVisitor {
    annotations: Vec<Annotation>,
}

impl PipelineVisitor for BrickTypeVisitor {
    fn visit_node(&mut self, position: &Position, node: &BrickNode, ctx: &VisitContext<'_>) {
        if let Some(category) = ctx.definition(node).map(|d| d.category) {
            if !ctx.flavor.allows(category) {
                self.annotations.push(
                    Annotation::error(
                        BRICK_TYPE_ANALYSIS_ID,
                        position.clone(),
                        format!(
                            "Brick \"{}\" of category {category} is not allowed in a {} pipeline",
                            node.display_name(),
                            ctx.flavor
                        ),
                    )
                    .with_detail(serde_json::json!({
                        "category": category,
                        "flavor": ctx.flavor,
                    })),
                );
            }
        }
        walk_node(self, position, node, ctx);
    }
}
