//! Brick registry lookup, resolved catalogs, and the built-in brick set.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;

use brickline_types::{
    BrickCategory, BrickDefinition, PipelineFlavor, PropertySchema, Result, VariableBinding,
};

// ---------------------------------------------------------------------------
// Built-in brick ids
// ---------------------------------------------------------------------------

pub const FOR_EACH_BRICK_ID: &str = "@brickline/for-each";
pub const IF_ELSE_BRICK_ID: &str = "@brickline/if-else";
pub const TRY_EXCEPT_BRICK_ID: &str = "@brickline/try-except";
pub const RETRY_BRICK_ID: &str = "@brickline/retry";
pub const DOCUMENT_BRICK_ID: &str = "@brickline/document";
pub const HTTP_BRICK_ID: &str = "@brickline/http";
pub const REGEX_BRICK_ID: &str = "@brickline/regex";
pub const JQ_BRICK_ID: &str = "@brickline/jq";
pub const PAGE_READER_BRICK_ID: &str = "@brickline/page-reader";
pub const ALERT_BRICK_ID: &str = "@brickline/alert";
pub const HTML_BRICK_ID: &str = "@brickline/html";

// ---------------------------------------------------------------------------
// BrickCatalog — result of one batched lookup
// ---------------------------------------------------------------------------

/// Definitions resolved for one analysis run. Misses are simply absent.
#[derive(Debug, Clone, Default)]
pub struct BrickCatalog {
    bricks: HashMap<String, Arc<BrickDefinition>>,
}

impl BrickCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, definition: Arc<BrickDefinition>) {
        self.bricks.insert(definition.id.clone(), definition);
    }

    pub fn get(&self, id: &str) -> Option<&BrickDefinition> {
        self.bricks.get(id).map(Arc::as_ref)
    }

    pub fn category(&self, id: &str) -> Option<BrickCategory> {
        self.get(id).map(|d| d.category)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.bricks.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.bricks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bricks.is_empty()
    }
}

impl FromIterator<BrickDefinition> for BrickCatalog {
    fn from_iter<I: IntoIterator<Item = BrickDefinition>>(iter: I) -> Self {
        let mut catalog = BrickCatalog::new();
        for definition in iter {
            catalog.insert(Arc::new(definition));
        }
        catalog
    }
}

// ---------------------------------------------------------------------------
// BrickRegistry trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait BrickRegistry: Send + Sync {
    /// Resolve every id in one call. Unknown ids are left out of the
    /// returned catalog rather than reported as errors.
    async fn resolve_all(&self, ids: &BTreeSet<String>) -> Result<BrickCatalog>;
}

// ---------------------------------------------------------------------------
// InMemoryRegistry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct InMemoryRegistry {
    bricks: HashMap<String, Arc<BrickDefinition>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, definition: BrickDefinition) {
        self.bricks
            .insert(definition.id.clone(), Arc::new(definition));
    }

    pub fn with(mut self, definition: BrickDefinition) -> Self {
        self.register(definition);
        self
    }

    pub fn get(&self, id: &str) -> Option<&BrickDefinition> {
        self.bricks.get(id).map(Arc::as_ref)
    }

    pub fn has(&self, id: &str) -> bool {
        self.bricks.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.bricks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bricks.is_empty()
    }
}

impl Extend<BrickDefinition> for InMemoryRegistry {
    fn extend<I: IntoIterator<Item = BrickDefinition>>(&mut self, iter: I) {
        for definition in iter {
            self.register(definition);
        }
    }
}

#[async_trait]
impl BrickRegistry for InMemoryRegistry {
    async fn resolve_all(&self, ids: &BTreeSet<String>) -> Result<BrickCatalog> {
        let mut catalog = BrickCatalog::new();
        for id in ids {
            match self.bricks.get(id) {
                Some(definition) => catalog.insert(definition.clone()),
                None => tracing::debug!(brick = %id, "Brick not found in registry"),
            }
        }
        Ok(catalog)
    }
}

// ---------------------------------------------------------------------------
// Built-in bricks
// ---------------------------------------------------------------------------

/// Definitions of the built-in control-flow and utility bricks.
pub fn builtin_definitions() -> Vec<BrickDefinition> {
    vec![
        BrickDefinition::new(FOR_EACH_BRICK_ID, BrickCategory::Transform)
            .with_name("For-Each Loop")
            .with_property("elements", PropertySchema::of_type("array"))
            .with_property("elementKey", PropertySchema::of_type("string"))
            .with_property(
                "body",
                PropertySchema::pipeline()
                    .with_binding(VariableBinding::from_config("elementKey", "element")),
            )
            .with_required("elements"),
        BrickDefinition::new(IF_ELSE_BRICK_ID, BrickCategory::Transform)
            .with_name("If-Else")
            .with_property("condition", PropertySchema::of_type("boolean"))
            .with_property("if", PropertySchema::pipeline())
            .with_property("else", PropertySchema::pipeline())
            .with_required("condition"),
        BrickDefinition::new(TRY_EXCEPT_BRICK_ID, BrickCategory::Transform)
            .with_name("Try-Except")
            .with_property("try", PropertySchema::pipeline())
            .with_property(
                "except",
                PropertySchema::pipeline()
                    .with_binding(VariableBinding::from_config("errorKey", "error")),
            )
            .with_property("errorKey", PropertySchema::of_type("string"))
            .with_property("finally", PropertySchema::pipeline()),
        BrickDefinition::new(RETRY_BRICK_ID, BrickCategory::Transform)
            .with_name("Retry")
            .with_property("body", PropertySchema::pipeline())
            .with_property("maxRetries", PropertySchema::of_type("integer")),
        BrickDefinition::new(DOCUMENT_BRICK_ID, BrickCategory::Renderer)
            .with_name("Document")
            .with_property("body", PropertySchema::of_type("array"))
            .with_property(
                "onClick",
                PropertySchema::pipeline().with_flavor(PipelineFlavor::NoRenderer),
            ),
        BrickDefinition::new(HTTP_BRICK_ID, BrickCategory::Transform)
            .with_name("HTTP Request")
            .with_property("url", PropertySchema::of_type("string"))
            .with_property("method", PropertySchema::of_type("string"))
            .with_property("params", PropertySchema::of_type("object"))
            .with_property("headers", PropertySchema::of_type("object"))
            .with_property("data", PropertySchema::of_type("object"))
            .with_property("integrationConfig", PropertySchema::of_type("object"))
            .with_required("url"),
        BrickDefinition::new(REGEX_BRICK_ID, BrickCategory::Transform)
            .with_name("Regex Extractor")
            .with_property("regex", PropertySchema::of_type("string"))
            .with_property("input", PropertySchema::of_type("string"))
            .with_required("regex"),
        BrickDefinition::new(JQ_BRICK_ID, BrickCategory::Transform)
            .with_name("jq Filter")
            .with_property("filter", PropertySchema::of_type("string"))
            .with_property("data", PropertySchema::of_type("object")),
        BrickDefinition::new(PAGE_READER_BRICK_ID, BrickCategory::Reader)
            .with_name("Page Metadata Reader"),
        BrickDefinition::new(ALERT_BRICK_ID, BrickCategory::Effect)
            .with_name("Window Alert")
            .with_property("message", PropertySchema::of_type("string")),
        BrickDefinition::new(HTML_BRICK_ID, BrickCategory::Renderer)
            .with_name("HTML Renderer")
            .with_property("html", PropertySchema::of_type("string")),
    ]
}

/// A registry pre-loaded with the built-in bricks.
pub fn builtin_registry() -> InMemoryRegistry {
    let mut registry = InMemoryRegistry::new();
    registry.extend(builtin_definitions());
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolve_all_tolerates_misses() {
        let registry = builtin_registry();
        let ids: BTreeSet<String> = [FOR_EACH_BRICK_ID, "@acme/unknown"]
            .into_iter()
            .map(String::from)
            .collect();
        let catalog = registry.resolve_all(&ids).await.unwrap();
        assert_eq!(catalog.len(), 1);
        assert!(catalog.contains(FOR_EACH_BRICK_ID));
        assert!(catalog.get("@acme/unknown").is_none());
    }

    #[test]
    fn builtin_control_flow_properties_in_declared_order() {
        let registry = builtin_registry();
        let try_except = registry.get(TRY_EXCEPT_BRICK_ID).unwrap();
        let names: Vec<_> = try_except
            .input_schema
            .pipeline_properties()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(names, vec!["try", "except", "finally"]);
    }

    #[test]
    fn document_actions_forbid_renderers() {
        let registry = builtin_registry();
        let document = registry.get(DOCUMENT_BRICK_ID).unwrap();
        let (_, schema) = document.input_schema.pipeline_properties().next().unwrap();
        assert_eq!(schema.flavor, Some(PipelineFlavor::NoRenderer));
    }

    #[test]
    fn catalog_reports_categories() {
        let catalog: BrickCatalog = builtin_definitions().into_iter().collect();
        assert_eq!(catalog.category(ALERT_BRICK_ID), Some(BrickCategory::Effect));
        assert_eq!(catalog.category(HTML_BRICK_ID), Some(BrickCategory::Renderer));
        assert_eq!(catalog.category("@acme/unknown"), None);
    }
}
