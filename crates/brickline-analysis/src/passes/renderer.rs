//! Renderer placement: at most one renderer per pipeline, and only as the
//! final node.

use async_trait::async_trait;

use brickline_types::{
    Annotation, BrickCategory, BrickNode, PipelineDocument, PipelineFlavor, Position, Result,
};

use super::{collect, AnalysisPass};
use crate::registry::BrickCatalog;
use crate::traversal::{walk_pipeline, PipelineVisitor, VisitContext};

pub const RENDERER_ANALYSIS_ID: &str = "renderer";

pub const MULTIPLE_RENDERERS_MESSAGE: &str =
    "A pipeline can only have one renderer; remove the multiple renderers";
pub const RENDERER_NOT_LAST_MESSAGE: &str = "The renderer must be the last brick in the pipeline";

#[derive(Debug, Clone, Copy, Default)]
pub struct RendererAnalysis;

#[async_trait]
impl AnalysisPass for RendererAnalysis {
    fn id(&self) -> &str {
        RENDERER_ANALYSIS_ID
    }

    async fn analyze(
        &self,
        document: &PipelineDocument,
        catalog: &BrickCatalog,
    ) -> Result<Vec<Annotation>> {
        Ok(collect(RendererVisitor::default(), document, catalog).annotations)
    }
}

#[derive(Default)]
struct RendererVisitor {
    annotations: Vec<Annotation>,
}

impl RendererVisitor {
    fn check(&mut self, position: &Position, nodes: &[BrickNode], ctx: &VisitContext<'_>) {
        let renderers: Vec<usize> = nodes
            .iter()
            .enumerate()
            .rev()
            .filter(|(_, node)| ctx.definition(node).map(|d| d.category) == Some(BrickCategory::Renderer))
            .map(|(index, _)| index)
            .collect();
        let last = nodes.len().saturating_sub(1);

        for &index in &renderers {
            let node_position = position.child(index);
            if renderers.len() > 1 {
                self.annotations.push(Annotation::error(
                    RENDERER_ANALYSIS_ID,
                    node_position.clone(),
                    MULTIPLE_RENDERERS_MESSAGE,
                ));
            }
            if index != last {
                self.annotations.push(Annotation::error(
                    RENDERER_ANALYSIS_ID,
                    node_position,
                    RENDERER_NOT_LAST_MESSAGE,
                ));
            }
        }
    }
}

impl PipelineVisitor for RendererVisitor {
    fn visit_pipeline(&mut self, position: &Position, nodes: &[BrickNode], ctx: &VisitContext<'_>) {
        if ctx.flavor != PipelineFlavor::NoRenderer {
            self.check(position, nodes, ctx);
        }
        walk_pipeline(self, position, nodes, ctx);
    }
}
