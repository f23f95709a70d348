//! Generic depth-first traversal over brick pipelines.
//!
//! Passes implement [`PipelineVisitor`] and override `visit_pipeline` /
//! `visit_node`. The default implementations delegate to [`walk_pipeline`] and
//! [`walk_node`], which an override calls to keep descending:
//!
//! ```ignore
//! fn visit_node(&mut self, position: &Position, node: &BrickNode, ctx: &VisitContext<'_>) {
//!     self.check(position, node, ctx);
//!     walk_node(self, position, node, ctx);
//! }
//! ```
//!
//! Traversal is pre-order, depth-first, left-to-right. Sub-pipelines are
//! discovered through the owning brick's input schema and visited in declared
//! property order.

use brickline_types::{
    BrickDefinition, BrickNode, Expression, PipelineDocument, PipelineFlavor, Position,
    PropertySchema,
};

use crate::registry::BrickCatalog;

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// The node and property that own a sub-pipeline.
#[derive(Debug, Clone, Copy)]
pub struct ParentScope<'a> {
    pub node: &'a BrickNode,
    pub definition: &'a BrickDefinition,
    /// Config property holding the sub-pipeline (e.g. `body`, `else`).
    pub property: &'a str,
    pub schema: &'a PropertySchema,
}

/// Context threaded through one traversal.
#[derive(Debug, Clone, Copy)]
pub struct VisitContext<'a> {
    pub catalog: &'a BrickCatalog,
    pub flavor: PipelineFlavor,
    /// `None` for the root pipeline.
    pub parent: Option<ParentScope<'a>>,
}

impl<'a> VisitContext<'a> {
    pub fn root(catalog: &'a BrickCatalog, flavor: PipelineFlavor) -> Self {
        Self {
            catalog,
            flavor,
            parent: None,
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// Resolved definition of `node`'s brick, if the registry knew it.
    pub fn definition(&self, node: &BrickNode) -> Option<&'a BrickDefinition> {
        self.catalog.get(&node.id)
    }
}

/// A sub-pipeline discovered in a node's configuration.
#[derive(Debug, Clone)]
pub struct SubPipeline<'a> {
    pub position: Position,
    pub nodes: &'a [BrickNode],
    pub ctx: VisitContext<'a>,
}

// ---------------------------------------------------------------------------
// Visitor
// ---------------------------------------------------------------------------

pub trait PipelineVisitor {
    fn visit_pipeline(&mut self, position: &Position, nodes: &[BrickNode], ctx: &VisitContext<'_>) {
        walk_pipeline(self, position, nodes, ctx);
    }

    fn visit_node(&mut self, position: &Position, node: &BrickNode, ctx: &VisitContext<'_>) {
        walk_node(self, position, node, ctx);
    }
}

/// Visit each node in order at `<position>.<index>`.
pub fn walk_pipeline<V>(visitor: &mut V, position: &Position, nodes: &[BrickNode], ctx: &VisitContext<'_>)
where
    V: PipelineVisitor + ?Sized,
{
    for (index, node) in nodes.iter().enumerate() {
        visitor.visit_node(&position.child(index), node, ctx);
    }
}

/// Visit every sub-pipeline of `node`.
pub fn walk_node<'a, V>(visitor: &mut V, position: &Position, node: &'a BrickNode, ctx: &VisitContext<'a>)
where
    V: PipelineVisitor + ?Sized,
{
    for sub in sub_pipelines(position, node, ctx) {
        visitor.visit_pipeline(&sub.position, sub.nodes, &sub.ctx);
    }
}

/// The brick definition of `node` with its pipeline-valued properties in
/// declared schema order. `None` for unresolved bricks.
pub fn declared_pipelines<'c>(
    catalog: &'c BrickCatalog,
    position: &Position,
    node: &BrickNode,
) -> Option<(
    &'c BrickDefinition,
    impl Iterator<Item = (&'c str, &'c PropertySchema)>,
)> {
    let Some(definition) = catalog.get(&node.id) else {
        tracing::debug!(
            brick = %node.id,
            position = %position,
            "Unresolved brick; skipping sub-pipeline discovery"
        );
        return None;
    };
    Some((definition, definition.input_schema.pipeline_properties()))
}

/// Sub-pipelines of `node` in declared schema order, each with its derived
/// context. Unresolved bricks have none.
pub fn sub_pipelines<'a>(
    position: &Position,
    node: &'a BrickNode,
    ctx: &VisitContext<'a>,
) -> Vec<SubPipeline<'a>> {
    let Some((definition, properties)) = declared_pipelines(ctx.catalog, position, node) else {
        return Vec::new();
    };

    let mut subs = Vec::new();
    for (property, schema) in properties {
        let nodes = match node.config.get(property) {
            Some(Expression::Pipeline(nodes)) => nodes,
            Some(_) => {
                tracing::debug!(
                    brick = %node.id,
                    property,
                    position = %position,
                    "Pipeline property does not hold a pipeline expression"
                );
                continue;
            }
            None => continue,
        };
        subs.push(SubPipeline {
            position: position.sub_pipeline(property),
            nodes,
            ctx: VisitContext {
                catalog: ctx.catalog,
                flavor: ctx.flavor.narrow(schema.flavor),
                parent: Some(ParentScope {
                    node,
                    definition,
                    property,
                    schema,
                }),
            },
        });
    }
    subs
}

/// Walk a whole document from its root pipeline.
pub fn traverse<V>(visitor: &mut V, document: &PipelineDocument, catalog: &BrickCatalog)
where
    V: PipelineVisitor + ?Sized,
{
    let ctx = VisitContext::root(catalog, document.flavor);
    visitor.visit_pipeline(&Position::root_pipeline(), &document.pipeline, &ctx);
}
