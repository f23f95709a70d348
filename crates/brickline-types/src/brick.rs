//! Brick registry metadata: categories, scope flavors, and input schemas.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::document::Expression;

/// `$ref` value marking a schema property as pipeline-valued.
pub const PIPELINE_SCHEMA_REF: &str = "#/$defs/pipeline";

// ---------------------------------------------------------------------------
// BrickCategory
// ---------------------------------------------------------------------------

/// Built-in brick categories. Resolved only through a registry lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrickCategory {
    Reader,
    Transform,
    Effect,
    Renderer,
}

impl BrickCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            BrickCategory::Reader => "reader",
            BrickCategory::Transform => "transform",
            BrickCategory::Effect => "effect",
            BrickCategory::Renderer => "renderer",
        }
    }

    /// Whether bricks of this category produce a value that can be bound to
    /// an output key.
    pub fn produces_output(&self) -> bool {
        matches!(self, BrickCategory::Reader | BrickCategory::Transform)
    }
}

impl fmt::Display for BrickCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// PipelineFlavor
// ---------------------------------------------------------------------------

/// Scope-level restriction on which brick categories may appear.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PipelineFlavor {
    #[default]
    AllBricks,
    NoRenderer,
    NoEffect,
}

impl PipelineFlavor {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineFlavor::AllBricks => "allBricks",
            PipelineFlavor::NoRenderer => "noRenderer",
            PipelineFlavor::NoEffect => "noEffect",
        }
    }

    /// Whether `category` is legal in a scope of this flavor.
    pub fn allows(&self, category: BrickCategory) -> bool {
        match self {
            PipelineFlavor::AllBricks => true,
            PipelineFlavor::NoRenderer => category != BrickCategory::Renderer,
            PipelineFlavor::NoEffect => category != BrickCategory::Effect,
        }
    }

    /// Flavor of a sub-pipeline whose property declares `declared`.
    ///
    /// `AllBricks` never widens an inherited restriction; a restrictive
    /// declaration replaces the inherited one.
    pub fn narrow(self, declared: Option<PipelineFlavor>) -> PipelineFlavor {
        match declared {
            None | Some(PipelineFlavor::AllBricks) => self,
            Some(flavor) => flavor,
        }
    }
}

impl fmt::Display for PipelineFlavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Schemas
// ---------------------------------------------------------------------------

/// Variable introduced by a sub-pipeline scope (e.g. a for-each element).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariableBinding {
    /// Config key whose literal value names the variable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_key: Option<String>,
    /// Name used when the config key is absent, blank, or not a literal.
    pub default: String,
}

impl VariableBinding {
    pub fn fixed(name: impl Into<String>) -> Self {
        Self {
            config_key: None,
            default: name.into(),
        }
    }

    pub fn from_config(config_key: impl Into<String>, default: impl Into<String>) -> Self {
        Self {
            config_key: Some(config_key.into()),
            default: default.into(),
        }
    }

    /// The bound variable (`@name`) for a node with `config`.
    pub fn resolve(&self, config: &IndexMap<String, Expression>) -> String {
        let configured = self
            .config_key
            .as_deref()
            .and_then(|key| config.get(key))
            .and_then(Expression::as_literal_str)
            .map(str::trim)
            .filter(|name| !name.is_empty());
        let name = configured.unwrap_or(&self.default);
        let name = name.strip_prefix('@').unwrap_or(name);
        format!("@{name}")
    }
}

/// Schema of one input property.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PropertySchema {
    #[serde(rename = "$ref", default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    /// Flavor of the sub-pipeline held by this property.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flavor: Option<PipelineFlavor>,
    /// Variable the sub-pipeline scope introduces.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binds: Option<VariableBinding>,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

impl PropertySchema {
    /// A plain (non-pipeline) property of the given JSON type.
    pub fn of_type(json_type: &str) -> Self {
        let mut rest = Map::new();
        rest.insert("type".into(), Value::String(json_type.into()));
        Self {
            rest,
            ..Self::default()
        }
    }

    /// A pipeline-valued property.
    pub fn pipeline() -> Self {
        Self {
            reference: Some(PIPELINE_SCHEMA_REF.to_string()),
            ..Self::default()
        }
    }

    pub fn with_flavor(mut self, flavor: PipelineFlavor) -> Self {
        self.flavor = Some(flavor);
        self
    }

    pub fn with_binding(mut self, binding: VariableBinding) -> Self {
        self.binds = Some(binding);
        self
    }

    pub fn is_pipeline(&self) -> bool {
        self.reference.as_deref() == Some(PIPELINE_SCHEMA_REF)
    }
}

/// Input schema of a brick. Property order is the declared order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InputSchema {
    #[serde(default)]
    pub properties: IndexMap<String, PropertySchema>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
}

impl InputSchema {
    /// Pipeline-valued properties in declared order.
    pub fn pipeline_properties(&self) -> impl Iterator<Item = (&str, &PropertySchema)> {
        self.properties
            .iter()
            .filter(|(_, schema)| schema.is_pipeline())
            .map(|(name, schema)| (name.as_str(), schema))
    }
}

/// Registry entry for one brick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrickDefinition {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub category: BrickCategory,
    #[serde(default)]
    pub input_schema: InputSchema,
}

impl BrickDefinition {
    pub fn new(id: impl Into<String>, category: BrickCategory) -> Self {
        Self {
            id: id.into(),
            name: None,
            category,
            input_schema: InputSchema::default(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_property(mut self, name: impl Into<String>, schema: PropertySchema) -> Self {
        self.input_schema.properties.insert(name.into(), schema);
        self
    }

    pub fn with_required(mut self, name: impl Into<String>) -> Self {
        self.input_schema.required.push(name.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn flavor_allows_categories() {
        assert!(PipelineFlavor::AllBricks.allows(BrickCategory::Renderer));
        assert!(!PipelineFlavor::NoRenderer.allows(BrickCategory::Renderer));
        assert!(PipelineFlavor::NoRenderer.allows(BrickCategory::Effect));
        assert!(!PipelineFlavor::NoEffect.allows(BrickCategory::Effect));
    }

    #[test]
    fn flavor_narrowing() {
        assert_eq!(
            PipelineFlavor::AllBricks.narrow(Some(PipelineFlavor::NoRenderer)),
            PipelineFlavor::NoRenderer
        );
        assert_eq!(
            PipelineFlavor::NoEffect.narrow(Some(PipelineFlavor::AllBricks)),
            PipelineFlavor::NoEffect
        );
        assert_eq!(PipelineFlavor::NoEffect.narrow(None), PipelineFlavor::NoEffect);
    }

    #[test]
    fn schema_keeps_declared_property_order() {
        let schema: InputSchema = serde_json::from_value(json!({
            "properties": {
                "try": {"$ref": "#/$defs/pipeline"},
                "except": {"$ref": "#/$defs/pipeline", "binds": {"configKey": "errorKey", "default": "error"}},
                "errorKey": {"type": "string"},
                "finally": {"$ref": "#/$defs/pipeline"}
            }
        }))
        .unwrap();
        let names: Vec<_> = schema.pipeline_properties().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["try", "except", "finally"]);
        assert_eq!(
            schema.properties["errorKey"].rest.get("type"),
            Some(&json!("string"))
        );
    }

    #[test]
    fn binding_resolves_from_config_or_default() {
        let binding = VariableBinding::from_config("elementKey", "element");
        let mut config = IndexMap::new();
        assert_eq!(binding.resolve(&config), "@element");

        config.insert("elementKey".into(), Expression::literal("row"));
        assert_eq!(binding.resolve(&config), "@row");

        config.insert("elementKey".into(), Expression::var("@dynamic"));
        assert_eq!(binding.resolve(&config), "@element");
    }

    #[test]
    fn category_output_capability() {
        assert!(BrickCategory::Reader.produces_output());
        assert!(BrickCategory::Transform.produces_output());
        assert!(!BrickCategory::Effect.produces_output());
        assert!(!BrickCategory::Renderer.produces_output());
    }

    #[test]
    fn definition_deserializes_camel_case() {
        let def: BrickDefinition = serde_json::from_value(json!({
            "id": "@test/jq",
            "category": "transform",
            "inputSchema": {"properties": {"filter": {"type": "string"}}}
        }))
        .unwrap();
        assert_eq!(def.category, BrickCategory::Transform);
        assert!(def.input_schema.pipeline_properties().next().is_none());
    }
}
