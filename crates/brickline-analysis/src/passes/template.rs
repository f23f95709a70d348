//! Template well-formedness, plus literal strings that look like templates.

use async_trait::async_trait;
use serde_json::Value;

use brickline_types::{
    contains_template_syntax, ActionCommand, Annotation, AnnotationAction, BrickNode, Expression,
    PipelineDocument, Position, Result, TemplateEngine,
};

use super::{collect, AnalysisPass};
use crate::registry::BrickCatalog;
use crate::traversal::{walk_node, PipelineVisitor, VisitContext};

pub const TEMPLATE_ANALYSIS_ID: &str = "template";

const TAGS: &[(&str, &str)] = &[("{{", "}}"), ("{%", "%}"), ("{#", "#}")];

/// Find the first unbalanced tag in a template source.
pub fn check_balanced(source: &str) -> std::result::Result<(), String> {
    let mut rest = source;
    let mut offset = 0;
    loop {
        let next_open = TAGS
            .iter()
            .filter_map(|(open, close)| rest.find(open).map(|i| (i, *open, *close)))
            .min_by_key(|(i, _, _)| *i);
        let next_close = TAGS
            .iter()
            .filter_map(|(_, close)| rest.find(close).map(|i| (i, *close)))
            .min_by_key(|(i, _)| *i);

        match (next_open, next_close) {
            (None, None) => return Ok(()),
            (None, Some((i, close))) => {
                return Err(format!("unexpected \"{close}\" at offset {}", offset + i))
            }
            (Some((open_at, open, close)), stray) => {
                if let Some((i, tag)) = stray {
                    if i < open_at {
                        return Err(format!("unexpected \"{tag}\" at offset {}", offset + i));
                    }
                }
                let body_start = open_at + open.len();
                let Some(end) = find_close(&rest[body_start..], close) else {
                    return Err(format!(
                        "unclosed \"{open}\" at offset {}",
                        offset + open_at
                    ));
                };
                let consumed = body_start + end + close.len();
                offset += consumed;
                rest = &rest[consumed..];
            }
        }
    }
}

/// Byte offset of `close` in a tag body. Nested `{ }` (object literals) and
/// quoted strings are skipped.
fn find_close(body: &str, close: &str) -> Option<usize> {
    let bytes = body.as_bytes();
    let mut depth = 0usize;
    let mut quote = None;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(_) if b == b'\\' => i += 1,
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None if depth == 0 && bytes[i..].starts_with(close.as_bytes()) => return Some(i),
            None => match b {
                b'\'' | b'"' => quote = Some(b),
                b'{' => depth += 1,
                b'}' => depth = depth.saturating_sub(1),
                _ => {}
            },
        }
        i += 1;
    }
    None
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateAnalysis;

#[async_trait]
impl AnalysisPass for TemplateAnalysis {
    fn id(&self) -> &str {
        TEMPLATE_ANALYSIS_ID
    }

    async fn analyze(
        &self,
        document: &PipelineDocument,
        catalog: &BrickCatalog,
    ) -> Result<Vec<Annotation>> {
        Ok(collect(TemplateVisitor::default(), document, catalog).annotations)
    }
}

#[derive(Default)]
struct TemplateVisitor {
    annotations: Vec<Annotation>,
}

impl TemplateVisitor {
    fn check_expression(&mut self, position: &Position, expr: &Expression) {
        match expr {
            Expression::Template { engine, source } => {
                if let Err(problem) = check_balanced(source) {
                    self.annotations.push(Annotation::error(
                        TEMPLATE_ANALYSIS_ID,
                        position.clone(),
                        format!("Invalid {engine} template: {problem}"),
                    ));
                }
            }
            Expression::Literal(Value::String(s))
                if s.contains("{{") && s.contains("}}") && check_balanced(s).is_ok() =>
            {
                debug_assert!(contains_template_syntax(s));
                let replacement: Value = Expression::Template {
                    engine: TemplateEngine::Nunjucks,
                    source: s.clone(),
                }
                .into();
                self.annotations.push(
                    Annotation::warning(
                        TEMPLATE_ANALYSIS_ID,
                        position.clone(),
                        "This text contains a template tag but is not a template expression",
                    )
                    .with_action(AnnotationAction::new(
                        "Convert to template",
                        ActionCommand::SetValue {
                            path: position.clone(),
                            value: replacement,
                        },
                    )),
                );
            }
            _ => {}
        }
    }

    fn check(&mut self, position: &Position, node: &BrickNode) {
        for (key, value) in &node.config {
            value.for_each_leaf(&position.config_field(key), &mut |pos, leaf| {
                self.check_expression(pos, leaf)
            });
        }
        if let Some(condition) = &node.condition {
            self.check_expression(&position.child("if"), condition);
        }
    }
}

impl PipelineVisitor for TemplateVisitor {
    fn visit_node(&mut self, position: &Position, node: &BrickNode, ctx: &VisitContext<'_>) {
        self.check(position, node);
        walk_node(self, position, node, ctx);
    }
}
