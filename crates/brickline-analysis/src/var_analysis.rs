//! Variable existence analysis.
//!
//! Computes, for every node, which variables are definitely or possibly bound
//! when execution reaches it. The result is a flat position → [`Snapshot`]
//! mapping holding each node's *entry* snapshot (its own output excluded).
//!
//! Scoping rules:
//! - a node with an output key binds `@key` (`Maybe` if it has a condition)
//!   and `@key.*` (always `Maybe`) for the siblings after it;
//! - a sub-pipeline sees everything its owner saw, plus the variable its
//!   scope introduces (e.g. the for-each element);
//! - nothing bound inside a sub-pipeline is visible after the owning node.

use std::collections::{BTreeMap, HashSet};
use std::ops::{Deref, DerefMut};
use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;

use brickline_types::{
    root_variable, Annotation, BrickNode, Existence, Expression, PipelineDocument, Position,
    Result, Snapshot,
};

use crate::passes::AnalysisPass;
use crate::registry::BrickCatalog;
use crate::traversal::{traverse, walk_node, walk_pipeline, PipelineVisitor, VisitContext};

pub const VAR_ANALYSIS_ID: &str = "var";

/// Trigger input context, always available.
pub const INPUT_VARIABLE: &str = "@input";

/// Declared options, available when the document declares them.
pub const OPTIONS_VARIABLE: &str = "@options";

// ---------------------------------------------------------------------------
// SnapshotMap
// ---------------------------------------------------------------------------

/// Read-only position → entry-snapshot mapping from one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct SnapshotMap {
    entries: BTreeMap<Position, Snapshot>,
}

impl SnapshotMap {
    pub fn get(&self, position: &Position) -> Option<&Snapshot> {
        self.entries.get(position)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Position, &Snapshot)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Everything one run of the analysis produces.
#[derive(Debug, Clone, Default)]
pub struct VarAnalysisOutput {
    pub snapshots: SnapshotMap,
    pub annotations: Vec<Annotation>,
}

// ---------------------------------------------------------------------------
// VarAnalysis
// ---------------------------------------------------------------------------

/// The variable existence pass.
#[derive(Debug, Clone)]
pub struct VarAnalysis {
    check_references: bool,
}

impl Default for VarAnalysis {
    fn default() -> Self {
        Self {
            check_references: true,
        }
    }
}

impl VarAnalysis {
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggle "might not be defined" warnings for variable references.
    pub fn with_reference_checks(mut self, enabled: bool) -> Self {
        self.check_references = enabled;
        self
    }

    pub fn run(&self, document: &PipelineDocument, catalog: &BrickCatalog) -> VarAnalysisOutput {
        let mut tracker = ScopeTracker::new(seed_snapshot(document), self.check_references);
        traverse(&mut tracker, document, catalog);
        debug_assert!(tracker.stack.is_empty(), "scope stack must be balanced");
        tracing::debug!(
            nodes = tracker.snapshots.len(),
            warnings = tracker.annotations.len(),
            "Variable analysis complete"
        );
        VarAnalysisOutput {
            snapshots: SnapshotMap {
                entries: tracker.snapshots,
            },
            annotations: tracker.annotations,
        }
    }
}

#[async_trait]
impl AnalysisPass for VarAnalysis {
    fn id(&self) -> &str {
        VAR_ANALYSIS_ID
    }

    async fn analyze(
        &self,
        document: &PipelineDocument,
        catalog: &BrickCatalog,
    ) -> Result<Vec<Annotation>> {
        Ok(self.run(document, catalog).annotations)
    }
}

/// Context variables available before the first node runs.
pub fn seed_snapshot(document: &PipelineDocument) -> Snapshot {
    let input = document.input.clone().unwrap_or(Value::Null);
    let mut seeded = Snapshot::from_context(INPUT_VARIABLE, &input, Existence::Definitely);
    if let Some(options) = &document.options {
        seeded = seeded.union(&Snapshot::from_context(
            OPTIONS_VARIABLE,
            options,
            Existence::Definitely,
        ));
    }
    seeded
}

/// What a node contributes to the siblings after it.
pub fn node_output(node: &BrickNode) -> Snapshot {
    let Some(variable) = node.output_variable() else {
        return Snapshot::new();
    };
    let existence = if node.condition.is_some() {
        Existence::Maybe
    } else {
        Existence::Definitely
    };
    Snapshot::new()
        .with(format!("{variable}.*"), Existence::Maybe)
        .with(variable, existence)
}

// ---------------------------------------------------------------------------
// Frames
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
struct Frame {
    /// Visible before the node about to be visited.
    vars: Snapshot,
    /// The previous node's contribution, not yet merged.
    output: Option<Snapshot>,
}

impl Frame {
    fn merged_vars(&self) -> Snapshot {
        match &self.output {
            Some(output) => self.vars.union(output),
            None => self.vars.clone(),
        }
    }
}

struct ScopeTracker {
    frame: Frame,
    stack: Vec<Frame>,
    snapshots: BTreeMap<Position, Snapshot>,
    annotations: Vec<Annotation>,
    reported: HashSet<(Position, String)>,
    check_references: bool,
}

/// Pops the scope pushed by [`ScopeTracker::enter_scope`] when dropped, also
/// while unwinding.
struct ScopeGuard<'t> {
    tracker: &'t mut ScopeTracker,
}

impl Deref for ScopeGuard<'_> {
    type Target = ScopeTracker;

    fn deref(&self) -> &ScopeTracker {
        self.tracker
    }
}

impl DerefMut for ScopeGuard<'_> {
    fn deref_mut(&mut self) -> &mut ScopeTracker {
        self.tracker
    }
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        self.tracker.exit_scope();
    }
}

impl ScopeTracker {
    fn new(seed: Snapshot, check_references: bool) -> Self {
        Self {
            frame: Frame {
                vars: seed,
                output: None,
            },
            stack: Vec::new(),
            snapshots: BTreeMap::new(),
            annotations: Vec::new(),
            reported: HashSet::new(),
            check_references,
        }
    }

    fn enter_scope(&mut self, binding: Option<String>) -> ScopeGuard<'_> {
        // The scope binding always holds inside the body, whatever the parent saw.
        let mut vars = self.frame.merged_vars();
        if let Some(name) = binding {
            vars = vars.bind(name, Existence::Definitely);
        }
        let child = Frame { vars, output: None };
        let parent = std::mem::replace(&mut self.frame, child);
        self.stack.push(parent);
        ScopeGuard { tracker: self }
    }

    fn exit_scope(&mut self) {
        match self.stack.pop() {
            Some(parent) => self.frame = parent,
            None => tracing::warn!("Variable scope stack underflow"),
        }
    }

    fn check_references(&mut self, position: &Position, node: &BrickNode) {
        let visible = self.frame.vars.clone();
        let mut missing = Vec::new();
        for (key, value) in &node.config {
            value.for_each_leaf(&position.config_field(key), &mut |pos, leaf| {
                for variable in referenced_variables(leaf) {
                    if visible.lookup(&variable).is_none() {
                        missing.push((pos.clone(), variable));
                    }
                }
            });
        }
        if let Some(condition) = &node.condition {
            for variable in referenced_variables(condition) {
                if visible.lookup(&variable).is_none() {
                    missing.push((position.child("if"), variable));
                }
            }
        }
        for (pos, variable) in missing {
            if self.reported.insert((pos.clone(), variable.clone())) {
                self.annotations.push(
                    Annotation::warning(
                        VAR_ANALYSIS_ID,
                        pos,
                        format!("Variable \"{variable}\" might not be defined"),
                    )
                    .with_detail(serde_json::json!({ "variable": variable })),
                );
            }
        }
    }
}

impl PipelineVisitor for ScopeTracker {
    fn visit_pipeline(&mut self, position: &Position, nodes: &[BrickNode], ctx: &VisitContext<'_>) {
        let Some(parent) = ctx.parent else {
            walk_pipeline(self, position, nodes, ctx);
            return;
        };
        let binding = parent
            .schema
            .binds
            .as_ref()
            .map(|binds| binds.resolve(&parent.node.config));
        let mut scope = self.enter_scope(binding);
        walk_pipeline(&mut *scope, position, nodes, ctx);
    }

    fn visit_node(&mut self, position: &Position, node: &BrickNode, ctx: &VisitContext<'_>) {
        if let Some(output) = self.frame.output.take() {
            self.frame.vars = self.frame.vars.union(&output);
        }
        self.snapshots
            .insert(position.clone(), self.frame.vars.clone());
        if self.check_references {
            self.check_references(position, node);
        }

        walk_node(self, position, node, ctx);

        self.frame.output = Some(node_output(node));
    }
}

// ---------------------------------------------------------------------------
// Variable references
// ---------------------------------------------------------------------------

fn template_reference_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?:^|[^\w@.])(@[A-Za-z_$][\w$]*)").unwrap())
}

/// Root variables (`@name`) an expression reads.
fn referenced_variables(expr: &Expression) -> Vec<String> {
    match expr {
        Expression::Var(path) => {
            let path = path.trim();
            if path.starts_with('@') {
                vec![root_variable(path).to_string()]
            } else {
                Vec::new()
            }
        }
        Expression::Template { source, .. } => template_reference_pattern()
            .captures_iter(source)
            .map(|c| c[1].to_string())
            .collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{builtin_definitions, FOR_EACH_BRICK_ID, IF_ELSE_BRICK_ID, TRY_EXCEPT_BRICK_ID};
    use brickline_types::Severity;
    use serde_json::json;

    fn catalog() -> BrickCatalog {
        builtin_definitions().into_iter().collect()
    }

    fn node_pos(index: usize) -> Position {
        Position::root_pipeline().child(index)
    }

    fn names(snapshot: &Snapshot) -> Vec<&str> {
        snapshot.names().collect()
    }

    #[test]
    fn seeds_input_and_options() {
        let doc = PipelineDocument::new(vec![BrickNode::new("@test/a")])
            .with_input(json!({"url": "x"}))
            .with_options(json!({"apiKey": "k"}));
        let out = VarAnalysis::new().run(&doc, &catalog());
        let entry = out.snapshots.get(&node_pos(0)).unwrap();
        assert_eq!(
            names(entry),
            vec!["@input", "@input.url", "@options", "@options.apiKey"]
        );
    }

    #[test]
    fn options_absent_when_not_declared() {
        let doc = PipelineDocument::new(vec![BrickNode::new("@test/a")]);
        let out = VarAnalysis::new().run(&doc, &catalog());
        assert_eq!(names(out.snapshots.get(&node_pos(0)).unwrap()), vec!["@input"]);
    }

    #[test]
    fn output_visible_to_following_siblings_only() {
        let doc = PipelineDocument::new(vec![
            BrickNode::new("@test/a").with_output_key("a"),
            BrickNode::new("@test/b"),
            BrickNode::new("@test/c"),
        ]);
        let out = VarAnalysis::new().run(&doc, &catalog());
        assert!(!out.snapshots.get(&node_pos(0)).unwrap().contains("@a"));
        for i in [1, 2] {
            let snap = out.snapshots.get(&node_pos(i)).unwrap();
            assert_eq!(snap.get("@a"), Some(Existence::Definitely));
            assert_eq!(snap.get("@a.*"), Some(Existence::Maybe));
        }
    }

    #[test]
    fn conditional_output_is_maybe() {
        let doc = PipelineDocument::new(vec![
            BrickNode::new("@test/a")
                .with_output_key("a")
                .with_condition(Expression::nunjucks("{{ @input.flag }}")),
            BrickNode::new("@test/b"),
        ]);
        let out = VarAnalysis::new().run(&doc, &catalog());
        let snap = out.snapshots.get(&node_pos(1)).unwrap();
        assert_eq!(snap.get("@a"), Some(Existence::Maybe));
    }

    #[test]
    fn loop_binding_visible_in_body_only() {
        let doc = PipelineDocument::new(vec![
            BrickNode::new(FOR_EACH_BRICK_ID)
                .with_output_key("loop")
                .with_config("elementKey", Expression::literal("row"))
                .with_config(
                    "body",
                    Expression::pipeline(vec![
                        BrickNode::new("@test/b").with_output_key("b"),
                        BrickNode::new("@test/c"),
                    ]),
                ),
            BrickNode::new("@test/after"),
        ]);
        let out = VarAnalysis::new().run(&doc, &catalog());
        let body = node_pos(0).sub_pipeline("body");

        let first = out.snapshots.get(&body.child(0usize)).unwrap();
        assert_eq!(first.get("@row"), Some(Existence::Definitely));
        assert!(!first.contains("@b"));

        let second = out.snapshots.get(&body.child(1usize)).unwrap();
        assert_eq!(second.get("@row"), Some(Existence::Definitely));
        assert_eq!(second.get("@b"), Some(Existence::Definitely));

        let after = out.snapshots.get(&node_pos(1)).unwrap();
        assert!(!after.contains("@row"));
        assert!(!after.contains("@b"));
        assert_eq!(after.get("@loop"), Some(Existence::Definitely));
    }

    #[test]
    fn loop_binding_shadows_earlier_conditional_output() {
        let doc = PipelineDocument::new(vec![
            BrickNode::new("@test/a")
                .with_output_key("row")
                .with_condition(Expression::var("@input.flag")),
            BrickNode::new(FOR_EACH_BRICK_ID)
                .with_config("elementKey", Expression::literal("row"))
                .with_config("body", Expression::pipeline(vec![BrickNode::new("@test/b")])),
            BrickNode::new("@test/after"),
        ]);
        let out = VarAnalysis::new().run(&doc, &catalog());

        let inside = out.snapshots.get(&node_pos(1).sub_pipeline("body").child(0usize)).unwrap();
        assert_eq!(inside.get("@row"), Some(Existence::Definitely));

        let after = out.snapshots.get(&node_pos(2)).unwrap();
        assert_eq!(after.get("@row"), Some(Existence::Maybe));
    }

    #[test]
    fn branches_do_not_leak_into_each_other() {
        let doc = PipelineDocument::new(vec![BrickNode::new(IF_ELSE_BRICK_ID)
            .with_output_key("branch")
            .with_config("condition", Expression::var("@input.flag"))
            .with_config(
                "if",
                Expression::pipeline(vec![BrickNode::new("@test/x").with_output_key("x")]),
            )
            .with_config(
                "else",
                Expression::pipeline(vec![BrickNode::new("@test/y")]),
            )]);
        let out = VarAnalysis::new().run(&doc, &catalog());
        let else_node = node_pos(0).sub_pipeline("else").child(0usize);
        assert!(!out.snapshots.get(&else_node).unwrap().contains("@x"));
    }

    #[test]
    fn except_branch_binds_error_variable() {
        let doc = PipelineDocument::new(vec![BrickNode::new(TRY_EXCEPT_BRICK_ID)
            .with_output_key("result")
            .with_config("try", Expression::pipeline(vec![BrickNode::new("@test/t")]))
            .with_config("except", Expression::pipeline(vec![BrickNode::new("@test/e")]))
            .with_config("finally", Expression::pipeline(vec![BrickNode::new("@test/f")]))]);
        let out = VarAnalysis::new().run(&doc, &catalog());
        let base = node_pos(0);
        let try_snap = out.snapshots.get(&base.sub_pipeline("try").child(0usize)).unwrap();
        let except_snap = out
            .snapshots
            .get(&base.sub_pipeline("except").child(0usize))
            .unwrap();
        let finally_snap = out
            .snapshots
            .get(&base.sub_pipeline("finally").child(0usize))
            .unwrap();
        assert!(!try_snap.contains("@error"));
        assert_eq!(except_snap.get("@error"), Some(Existence::Definitely));
        assert!(!finally_snap.contains("@error"));
    }

    #[test]
    fn node_without_output_clears_nothing_but_adds_nothing() {
        let doc = PipelineDocument::new(vec![
            BrickNode::new("@test/a").with_output_key("a"),
            BrickNode::new("@test/b"),
            BrickNode::new("@test/c").with_output_key("c"),
            BrickNode::new("@test/d"),
        ]);
        let out = VarAnalysis::new().run(&doc, &catalog());
        let last = out.snapshots.get(&node_pos(3)).unwrap();
        assert_eq!(
            names(last),
            vec!["@a", "@a.*", "@c", "@c.*", "@input"]
        );
    }

    #[test]
    fn scope_guard_restores_stack_when_descent_panics() {
        let mut tracker = ScopeTracker::new(Snapshot::new().with("@root", Existence::Definitely), false);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _scope = tracker.enter_scope(Some("@element".into()));
            panic!("fault mid-descent");
        }));
        assert!(result.is_err());
        assert!(tracker.stack.is_empty());
        assert!(!tracker.frame.vars.contains("@element"));
        assert!(tracker.frame.vars.contains("@root"));
    }

    #[test]
    fn warns_on_undefined_variable() {
        let doc = PipelineDocument::new(vec![
            BrickNode::new("@test/a").with_config("value", Expression::var("@missing.x")),
        ]);
        let out = VarAnalysis::new().run(&doc, &catalog());
        assert_eq!(out.annotations.len(), 1);
        let ann = &out.annotations[0];
        assert_eq!(ann.severity, Severity::Warning);
        assert_eq!(ann.position.path(), "pipeline.0.config.value");
        assert!(ann.message.contains("@missing"));
    }

    #[test]
    fn template_references_checked() {
        let doc = PipelineDocument::new(vec![
            BrickNode::new("@test/a").with_output_key("a"),
            BrickNode::new("@test/b").with_config(
                "text",
                Expression::nunjucks("Hello {{ @a.name }} {{ @ghost }} mail@example.com"),
            ),
        ]);
        let out = VarAnalysis::new().run(&doc, &catalog());
        let messages: Vec<_> = out.annotations.iter().map(|a| a.message.as_str()).collect();
        assert_eq!(messages, vec!["Variable \"@ghost\" might not be defined"]);
    }

    #[tokio::test]
    async fn runs_as_analysis_pass() {
        let doc = PipelineDocument::new(vec![
            BrickNode::new("@test/a").with_condition(Expression::var("@ghost")),
        ]);
        let pass = VarAnalysis::new();
        let anns = pass.analyze(&doc, &catalog()).await.unwrap();
        assert_eq!(pass.id(), VAR_ANALYSIS_ID);
        assert_eq!(anns.len(), 1);
        assert_eq!(anns[0].position.path(), "pipeline.0.if");
    }

    #[test]
    fn reference_checks_can_be_disabled() {
        let doc = PipelineDocument::new(vec![
            BrickNode::new("@test/a").with_config("value", Expression::var("@missing")),
        ]);
        let out = VarAnalysis::new()
            .with_reference_checks(false)
            .run(&doc, &catalog());
        assert!(out.annotations.is_empty());
        assert_eq!(out.snapshots.len(), 1);
    }

    #[test]
    fn loop_variable_available_to_body_references() {
        let doc = PipelineDocument::new(vec![BrickNode::new(FOR_EACH_BRICK_ID)
            .with_output_key("loop")
            .with_config("elements", Expression::var("@input.items"))
            .with_config(
                "body",
                Expression::pipeline(vec![
                    BrickNode::new("@test/b").with_config("value", Expression::var("@element.id")),
                ]),
            )]);
        let doc = doc.with_input(json!({"items": []}));
        let out = VarAnalysis::new().run(&doc, &catalog());
        assert!(out.annotations.is_empty(), "unexpected: {:?}", out.annotations);
    }
}
