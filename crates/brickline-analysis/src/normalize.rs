//! Document normalization applied at the editor boundary.
//!
//! Gives every node a unique instance id and materializes missing
//! pipeline-valued properties as empty pipelines, so that every sub-pipeline
//! the schema declares has a stable position.

use std::collections::HashSet;

use uuid::Uuid;

use brickline_types::{BrickNode, Expression, PipelineDocument, Position};

use crate::registry::BrickCatalog;
use crate::traversal::declared_pipelines;

pub struct Normalizer<'a> {
    catalog: &'a BrickCatalog,
    id_source: Box<dyn FnMut() -> Uuid + 'a>,
}

impl<'a> Normalizer<'a> {
    pub fn new(catalog: &'a BrickCatalog) -> Self {
        Self {
            catalog,
            id_source: Box::new(Uuid::new_v4),
        }
    }

    /// Replace the id generator (deterministic ids in tests).
    pub fn with_id_source(mut self, source: impl FnMut() -> Uuid + 'a) -> Self {
        self.id_source = Box::new(source);
        self
    }

    pub fn normalize(&mut self, document: &PipelineDocument) -> PipelineDocument {
        let mut normalized = document.clone();
        let mut seen = HashSet::new();
        let mut assigned = 0usize;
        self.normalize_pipeline(
            &Position::root_pipeline(),
            &mut normalized.pipeline,
            &mut seen,
            &mut assigned,
        );
        tracing::debug!(assigned, nodes = seen.len(), "Normalized pipeline document");
        normalized
    }

    fn normalize_pipeline(
        &mut self,
        position: &Position,
        nodes: &mut [BrickNode],
        seen: &mut HashSet<Uuid>,
        assigned: &mut usize,
    ) {
        for (index, node) in nodes.iter_mut().enumerate() {
            self.normalize_node(&position.child(index), node, seen, assigned);
        }
    }

    fn normalize_node(
        &mut self,
        position: &Position,
        node: &mut BrickNode,
        seen: &mut HashSet<Uuid>,
        assigned: &mut usize,
    ) {
        let needs_id = match node.instance_id {
            Some(id) => !seen.insert(id),
            None => true,
        };
        if needs_id {
            let id = self.fresh_id(seen);
            node.instance_id = Some(id);
            *assigned += 1;
        }

        let Some((_, properties)) = declared_pipelines(self.catalog, position, node) else {
            return;
        };
        let properties: Vec<&str> = properties.map(|(property, _)| property).collect();
        for property in properties {
            let value = node
                .config
                .entry(property.to_string())
                .or_insert_with(|| Expression::Pipeline(Vec::new()));
            match value.as_pipeline_mut() {
                Some(children) => {
                    self.normalize_pipeline(&position.sub_pipeline(property), children, seen, assigned)
                }
                None => tracing::debug!(
                    brick = %node.id,
                    property,
                    position = %position,
                    "Pipeline property does not hold a pipeline expression"
                ),
            }
        }
    }

    fn fresh_id(&mut self, seen: &mut HashSet<Uuid>) -> Uuid {
        loop {
            let id = (self.id_source)();
            if seen.insert(id) {
                return id;
            }
        }
    }
}

/// Normalize with random v4 ids.
pub fn normalize(document: &PipelineDocument, catalog: &BrickCatalog) -> PipelineDocument {
    Normalizer::new(catalog).normalize(document)
}
