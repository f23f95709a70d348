//! Pipeline tree model: documents, nodes, and configuration expressions.
//!
//! JSON encoding of expressions:
//! ```text
//! "literal" | 42 | true | null                    -> Expression::Literal
//! {"__type__": "var", "__value__": "@out.name"}    -> Expression::Var
//! {"__type__": "nunjucks", "__value__": "{{ x }}"} -> Expression::Template
//! {"__type__": "pipeline", "__value__": [ ... ]}   -> Expression::Pipeline
//! { ... } / [ ... ]                                -> Expression::Object / Expression::Array
//! ```

use std::collections::BTreeSet;
use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::brick::PipelineFlavor;
use crate::position::{
    Position, Segment, CONFIG_KEY, EXPRESSION_VALUE_KEY, ROOT_PIPELINE_KEY,
};
use crate::BricklineError;

const EXPRESSION_TYPE_KEY: &str = "__type__";

/// An ordered sequence of brick invocations.
pub type Pipeline = Vec<BrickNode>;

// ---------------------------------------------------------------------------
// TemplateEngine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TemplateEngine {
    Mustache,
    Nunjucks,
    Handlebars,
}

impl TemplateEngine {
    pub fn as_str(&self) -> &'static str {
        match self {
            TemplateEngine::Mustache => "mustache",
            TemplateEngine::Nunjucks => "nunjucks",
            TemplateEngine::Handlebars => "handlebars",
        }
    }

    fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "mustache" => Some(TemplateEngine::Mustache),
            "nunjucks" => Some(TemplateEngine::Nunjucks),
            "handlebars" => Some(TemplateEngine::Handlebars),
            _ => None,
        }
    }
}

impl fmt::Display for TemplateEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `true` if `source` contains a template tag (`{{`, `{%` or `{#`).
pub fn contains_template_syntax(source: &str) -> bool {
    source.contains("{{") || source.contains("{%") || source.contains("{#")
}

// ---------------------------------------------------------------------------
// Expression
// ---------------------------------------------------------------------------

/// A configuration value: a literal, or an expression evaluated at run time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub enum Expression {
    /// Scalar JSON value (string, number, boolean, null).
    Literal(Value),
    /// Variable reference such as `@out.name`.
    Var(String),
    /// Template source rendered by `engine`.
    Template { engine: TemplateEngine, source: String },
    /// Embedded sub-pipeline (loop body, branch, handler).
    Pipeline(Pipeline),
    Object(IndexMap<String, Expression>),
    Array(Vec<Expression>),
}

impl Expression {
    pub fn literal(value: impl Into<Value>) -> Self {
        let value = value.into();
        match value {
            Value::Object(_) | Value::Array(_) => {
                Expression::try_from(value).unwrap_or(Expression::Literal(Value::Null))
            }
            other => Expression::Literal(other),
        }
    }

    pub fn var(path: impl Into<String>) -> Self {
        Expression::Var(path.into())
    }

    pub fn nunjucks(source: impl Into<String>) -> Self {
        Expression::Template {
            engine: TemplateEngine::Nunjucks,
            source: source.into(),
        }
    }

    pub fn mustache(source: impl Into<String>) -> Self {
        Expression::Template {
            engine: TemplateEngine::Mustache,
            source: source.into(),
        }
    }

    pub fn pipeline(nodes: Pipeline) -> Self {
        Expression::Pipeline(nodes)
    }

    /// The node sequence of a pipeline expression.
    pub fn as_pipeline(&self) -> Option<&Pipeline> {
        match self {
            Expression::Pipeline(nodes) => Some(nodes),
            _ => None,
        }
    }

    pub fn as_pipeline_mut(&mut self) -> Option<&mut Pipeline> {
        match self {
            Expression::Pipeline(nodes) => Some(nodes),
            _ => None,
        }
    }

    /// The string of a literal string value.
    pub fn as_literal_str(&self) -> Option<&str> {
        match self {
            Expression::Literal(Value::String(s)) => Some(s),
            _ => None,
        }
    }

    /// The value this expression always evaluates to, if it is known without
    /// running the pipeline. Templates without any template tag count as
    /// their source string.
    pub fn static_value(&self) -> Option<Value> {
        match self {
            Expression::Literal(v) => Some(v.clone()),
            Expression::Template { source, .. } if !contains_template_syntax(source) => {
                Some(Value::String(source.clone()))
            }
            _ => None,
        }
    }

    /// Visit this expression and every nested object/array member with its
    /// position. Pipeline expressions are reported but not entered; the
    /// traversal engine owns sub-pipelines.
    pub fn for_each_leaf<'a, F>(&'a self, position: &Position, f: &mut F)
    where
        F: FnMut(&Position, &'a Expression),
    {
        match self {
            Expression::Object(fields) => {
                for (key, value) in fields {
                    value.for_each_leaf(&position.child(key.as_str()), f);
                }
            }
            Expression::Array(items) => {
                for (i, value) in items.iter().enumerate() {
                    value.for_each_leaf(&position.child(i), f);
                }
            }
            leaf => f(position, leaf),
        }
    }
}

fn expression_error(message: impl Into<String>) -> BricklineError {
    BricklineError::InvalidExpression(message.into())
}

impl TryFrom<Value> for Expression {
    type Error = BricklineError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(mut map) => {
                let tag = match map.get(EXPRESSION_TYPE_KEY) {
                    Some(Value::String(t)) if map.contains_key(EXPRESSION_VALUE_KEY) => {
                        Some(t.clone())
                    }
                    _ => None,
                };
                let Some(tag) = tag else {
                    let mut fields = IndexMap::with_capacity(map.len());
                    for (k, v) in map {
                        fields.insert(k, Expression::try_from(v)?);
                    }
                    return Ok(Expression::Object(fields));
                };
                let inner = map.remove(EXPRESSION_VALUE_KEY).unwrap_or(Value::Null);
                decode_tagged(&tag, inner)
            }
            Value::Array(items) => items
                .into_iter()
                .map(Expression::try_from)
                .collect::<Result<Vec<_>, _>>()
                .map(Expression::Array),
            scalar => Ok(Expression::Literal(scalar)),
        }
    }
}

fn decode_tagged(tag: &str, inner: Value) -> crate::Result<Expression> {
    if tag == "pipeline" {
        let Value::Array(items) = inner else {
            return Err(expression_error(
                "pipeline expression value must be an array of nodes",
            ));
        };
        let nodes = items
            .into_iter()
            .map(|v| {
                serde_json::from_value::<BrickNode>(v)
                    .map_err(|e| expression_error(format!("invalid pipeline node: {e}")))
            })
            .collect::<crate::Result<Vec<_>>>()?;
        return Ok(Expression::Pipeline(nodes));
    }

    let Value::String(text) = inner else {
        return Err(expression_error(format!(
            "'{tag}' expression value must be a string"
        )));
    };
    if tag == "var" {
        return Ok(Expression::Var(text));
    }
    match TemplateEngine::from_tag(tag) {
        Some(engine) => Ok(Expression::Template {
            engine,
            source: text,
        }),
        None => Err(expression_error(format!("unknown expression type '{tag}'"))),
    }
}

fn tagged(tag: &str, value: Value) -> Value {
    let mut map = Map::new();
    map.insert(EXPRESSION_TYPE_KEY.to_string(), Value::String(tag.to_string()));
    map.insert(EXPRESSION_VALUE_KEY.to_string(), value);
    Value::Object(map)
}

impl From<Expression> for Value {
    fn from(expr: Expression) -> Self {
        match expr {
            Expression::Literal(v) => v,
            Expression::Var(path) => tagged("var", Value::String(path)),
            Expression::Template { engine, source } => {
                tagged(engine.as_str(), Value::String(source))
            }
            Expression::Pipeline(nodes) => tagged(
                "pipeline",
                Value::Array(
                    nodes
                        .into_iter()
                        .map(|n| serde_json::to_value(n).unwrap_or(Value::Null))
                        .collect(),
                ),
            ),
            Expression::Object(fields) => {
                Value::Object(fields.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
            Expression::Array(items) => Value::Array(items.into_iter().map(Value::from).collect()),
        }
    }
}

// ---------------------------------------------------------------------------
// BrickNode
// ---------------------------------------------------------------------------

/// One brick invocation in a pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrickNode {
    /// Registry key of the brick.
    pub id: String,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub config: IndexMap<String, Expression>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_key: Option<String>,
    #[serde(default, rename = "if", skip_serializing_if = "Option::is_none")]
    pub condition: Option<Expression>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl BrickNode {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            config: IndexMap::new(),
            output_key: None,
            condition: None,
            instance_id: None,
            label: None,
        }
    }

    pub fn with_output_key(mut self, key: impl Into<String>) -> Self {
        self.output_key = Some(key.into());
        self
    }

    pub fn with_config(mut self, key: impl Into<String>, value: Expression) -> Self {
        self.config.insert(key.into(), value);
        self
    }

    pub fn with_condition(mut self, condition: Expression) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn with_instance_id(mut self, id: Uuid) -> Self {
        self.instance_id = Some(id);
        self
    }

    /// The variable name this node's output is bound to (`@key`), if any.
    /// A blank key binds nothing.
    pub fn output_variable(&self) -> Option<String> {
        let key = self.output_key.as_deref()?.trim();
        let key = key.strip_prefix('@').unwrap_or(key);
        if key.is_empty() {
            None
        } else {
            Some(format!("@{key}"))
        }
    }

    /// Display name for logs and messages.
    pub fn display_name(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.id)
    }
}

// ---------------------------------------------------------------------------
// PipelineDocument
// ---------------------------------------------------------------------------

/// A root pipeline plus the context it runs in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineDocument {
    pub pipeline: Pipeline,
    #[serde(default)]
    pub flavor: PipelineFlavor,
    /// Shape of the trigger input context (`@input`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    /// Declared options (`@options`); absent when the document declares none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Value>,
}

impl PipelineDocument {
    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            pipeline,
            flavor: PipelineFlavor::AllBricks,
            input: None,
            options: None,
        }
    }

    pub fn with_flavor(mut self, flavor: PipelineFlavor) -> Self {
        self.flavor = flavor;
        self
    }

    pub fn with_input(mut self, input: Value) -> Self {
        self.input = Some(input);
        self
    }

    pub fn with_options(mut self, options: Value) -> Self {
        self.options = Some(options);
        self
    }

    /// Every brick id referenced anywhere in the document, including ids
    /// inside nested pipeline expressions regardless of declared schema.
    pub fn brick_ids(&self) -> BTreeSet<String> {
        let mut ids = BTreeSet::new();
        collect_ids(&self.pipeline, &mut ids);
        ids
    }

    /// Total number of nodes, nested ones included.
    pub fn node_count(&self) -> usize {
        fn count(pipeline: &Pipeline) -> usize {
            pipeline
                .iter()
                .map(|n| 1 + n.config.values().map(count_expr).sum::<usize>())
                .sum()
        }
        fn count_expr(expr: &Expression) -> usize {
            match expr {
                Expression::Pipeline(nodes) => count(nodes),
                Expression::Object(fields) => fields.values().map(count_expr).sum(),
                Expression::Array(items) => items.iter().map(count_expr).sum(),
                _ => 0,
            }
        }
        count(&self.pipeline)
    }

    /// Resolve a node position (`pipeline.1.config.body.__value__.0`).
    pub fn node_at(&self, position: &Position) -> Option<&BrickNode> {
        let mut segments = position.segments().iter();
        match segments.next()? {
            Segment::Key(k) if k == ROOT_PIPELINE_KEY => {}
            _ => return None,
        }
        let mut pipeline = &self.pipeline;
        loop {
            let Segment::Index(i) = segments.next()? else {
                return None;
            };
            let node = pipeline.get(*i)?;
            match segments.next() {
                None => return Some(node),
                Some(Segment::Key(k)) if k == CONFIG_KEY => {}
                Some(_) => return None,
            }
            let Segment::Key(property) = segments.next()? else {
                return None;
            };
            match segments.next()? {
                Segment::Key(k) if k == EXPRESSION_VALUE_KEY => {}
                _ => return None,
            }
            pipeline = node.config.get(property)?.as_pipeline()?;
        }
    }
}

fn collect_ids(pipeline: &Pipeline, ids: &mut BTreeSet<String>) {
    for node in pipeline {
        ids.insert(node.id.clone());
        for value in node.config.values() {
            collect_expr_ids(value, ids);
        }
    }
}

fn collect_expr_ids(expr: &Expression, ids: &mut BTreeSet<String>) {
    match expr {
        Expression::Pipeline(nodes) => collect_ids(nodes, ids),
        Expression::Object(fields) => fields.values().for_each(|v| collect_expr_ids(v, ids)),
        Expression::Array(items) => items.iter().for_each(|v| collect_expr_ids(v, ids)),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_tagged_expressions() {
        let expr: Expression =
            serde_json::from_value(json!({"__type__": "var", "__value__": "@out.name"})).unwrap();
        assert_eq!(expr, Expression::var("@out.name"));

        let expr: Expression =
            serde_json::from_value(json!({"__type__": "nunjucks", "__value__": "{{ @x }}"}))
                .unwrap();
        assert_eq!(expr, Expression::nunjucks("{{ @x }}"));
    }

    #[test]
    fn decodes_pipeline_expression() {
        let expr: Expression = serde_json::from_value(json!({
            "__type__": "pipeline",
            "__value__": [{"id": "@test/a", "outputKey": "a"}]
        }))
        .unwrap();
        let nodes = expr.as_pipeline().unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].output_key.as_deref(), Some("a"));
    }

    #[test]
    fn pipeline_expression_rejects_bare_record() {
        let result: Result<Expression, _> = serde_json::from_value(json!({
            "__type__": "pipeline",
            "__value__": {"id": "@test/a"}
        }));
        assert!(result.is_err());
    }

    #[test]
    fn unknown_tag_rejected() {
        let result: Result<Expression, _> =
            serde_json::from_value(json!({"__type__": "python", "__value__": "1 + 1"}));
        assert!(result.is_err());
    }

    #[test]
    fn nested_object_keeps_expressions_and_order() {
        let expr: Expression = serde_json::from_value(json!({
            "zeta": {"__type__": "var", "__value__": "@a"},
            "alpha": [1, "two"]
        }))
        .unwrap();
        let Expression::Object(fields) = &expr else {
            panic!("expected object, got {expr:?}");
        };
        assert_eq!(fields.keys().collect::<Vec<_>>(), vec!["zeta", "alpha"]);
        assert_eq!(fields["zeta"], Expression::var("@a"));
    }

    #[test]
    fn node_serialization_round_trips() {
        let source = json!({
            "id": "@test/for-each",
            "config": {
                "elements": {"__type__": "var", "__value__": "@items"},
                "body": {"__type__": "pipeline", "__value__": [{"id": "@test/b"}]}
            },
            "outputKey": "loop",
            "if": {"__type__": "nunjucks", "__value__": "{{ @flag }}"}
        });
        let node: BrickNode = serde_json::from_value(source.clone()).unwrap();
        assert_eq!(serde_json::to_value(&node).unwrap(), source);
    }

    #[test]
    fn static_value_of_plain_template() {
        assert_eq!(
            Expression::nunjucks("always").static_value(),
            Some(json!("always"))
        );
        assert_eq!(Expression::nunjucks("{{ @x }}").static_value(), None);
        assert_eq!(Expression::var("@x").static_value(), None);
    }

    #[test]
    fn output_variable_normalizes_prefix() {
        assert_eq!(
            BrickNode::new("a").with_output_key("out").output_variable(),
            Some("@out".into())
        );
        assert_eq!(
            BrickNode::new("a").with_output_key("@out").output_variable(),
            Some("@out".into())
        );
        assert_eq!(BrickNode::new("a").with_output_key("  ").output_variable(), None);
    }

    #[test]
    fn brick_ids_include_nested() {
        let doc = PipelineDocument::new(vec![
            BrickNode::new("@test/a"),
            BrickNode::new("@test/loop").with_config(
                "body",
                Expression::pipeline(vec![BrickNode::new("@test/inner")]),
            ),
        ]);
        let ids: Vec<_> = doc.brick_ids().into_iter().collect();
        assert_eq!(ids, vec!["@test/a", "@test/inner", "@test/loop"]);
        assert_eq!(doc.node_count(), 3);
    }

    #[test]
    fn node_at_resolves_nested_positions() {
        let doc = PipelineDocument::new(vec![
            BrickNode::new("@test/a"),
            BrickNode::new("@test/loop").with_config(
                "body",
                Expression::pipeline(vec![BrickNode::new("@test/inner")]),
            ),
        ]);
        let inner = Position::root_pipeline()
            .child(1usize)
            .sub_pipeline("body")
            .child(0usize);
        assert_eq!(doc.node_at(&inner).map(|n| n.id.as_str()), Some("@test/inner"));
        assert!(doc.node_at(&Position::root_pipeline().child(5usize)).is_none());
    }

    #[test]
    fn for_each_leaf_reports_positions() {
        let expr = Expression::literal(json!({"headers": {"auth": "x"}, "tags": ["a"]}));
        let mut seen = Vec::new();
        expr.for_each_leaf(&Position::root(), &mut |pos, _| seen.push(pos.path()));
        assert_eq!(seen, vec!["headers.auth", "tags.0"]);
    }
}
