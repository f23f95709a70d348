//! Maps errors from the last recorded run back onto the nodes that raised
//! them.

use std::collections::HashMap;

use async_trait::async_trait;
use uuid::Uuid;

use brickline_types::position::CONFIG_KEY;
use brickline_types::{
    pointer_tokens, Annotation, BrickNode, PipelineDocument, Position, Result, Segment,
    TraceError, TraceRecord,
};

use super::{collect, AnalysisPass};
use crate::registry::BrickCatalog;
use crate::traversal::{walk_node, PipelineVisitor, VisitContext};

pub const TRACE_ANALYSIS_ID: &str = "trace";

#[derive(Debug, Clone, Default)]
pub struct TraceAnalysis {
    /// Latest error per instance id. Successful latest runs are dropped.
    errors: HashMap<Uuid, TraceError>,
}

impl TraceAnalysis {
    pub fn new(records: &[TraceRecord]) -> Self {
        let mut latest: HashMap<Uuid, (usize, &TraceRecord)> = HashMap::new();
        for (index, record) in records.iter().enumerate() {
            let newer = match latest.get(&record.instance_id) {
                Some((prev_index, prev)) => {
                    (record.timestamp, index) >= (prev.timestamp, *prev_index)
                }
                None => true,
            };
            if newer {
                latest.insert(record.instance_id, (index, record));
            }
        }
        let errors = latest
            .into_iter()
            .filter_map(|(id, (_, record))| record.error.clone().map(|e| (id, e)))
            .collect();
        Self { errors }
    }

    pub fn error_count(&self) -> usize {
        self.errors.len()
    }
}

#[async_trait]
impl AnalysisPass for TraceAnalysis {
    fn id(&self) -> &str {
        TRACE_ANALYSIS_ID
    }

    async fn analyze(
        &self,
        document: &PipelineDocument,
        catalog: &BrickCatalog,
    ) -> Result<Vec<Annotation>> {
        if self.errors.is_empty() {
            return Ok(Vec::new());
        }
        let visitor = TraceVisitor {
            errors: &self.errors,
            annotations: Vec::new(),
        };
        Ok(collect(visitor, document, catalog).annotations)
    }
}

struct TraceVisitor<'a> {
    errors: &'a HashMap<Uuid, TraceError>,
    annotations: Vec<Annotation>,
}

/// Position of a config sub-field addressed by a JSON pointer.
fn pointer_position(node_position: &Position, pointer: &str) -> Option<Position> {
    let tokens = pointer_tokens(pointer);
    if tokens.is_empty() {
        return None;
    }
    let mut position = node_position.child(CONFIG_KEY);
    for token in tokens {
        position = match token.parse::<usize>() {
            Ok(index) if token.bytes().all(|b| b.is_ascii_digit()) => {
                position.child(Segment::Index(index))
            }
            _ => position.child(token),
        };
    }
    Some(position)
}

impl TraceVisitor<'_> {
    fn check(&mut self, position: &Position, node: &BrickNode) {
        let Some(error) = node.instance_id.and_then(|id| self.errors.get(&id)) else {
            return;
        };

        if error.is_input_validation() && !error.errors.is_empty() {
            for sub in &error.errors {
                let target = pointer_position(position, &sub.instance_location)
                    .unwrap_or_else(|| position.clone());
                self.annotations.push(
                    Annotation::error(TRACE_ANALYSIS_ID, target, sub.error.clone())
                        .with_detail(serde_json::json!({
                            "instanceLocation": sub.instance_location,
                        })),
                );
            }
            return;
        }

        self.annotations.push(
            Annotation::error(TRACE_ANALYSIS_ID, position.clone(), error.message.clone())
                .with_detail(serde_json::json!({ "name": error.name })),
        );
    }
}

impl PipelineVisitor for TraceVisitor<'_> {
    fn visit_node(&mut self, position: &Position, node: &BrickNode, ctx: &VisitContext<'_>) {
        self.check(position, node);
        walk_node(self, position, node, ctx);
    }
}
