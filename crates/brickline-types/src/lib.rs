//! Shared types, errors, positions, and snapshots for Brickline pipeline analysis.
//!
//! This crate provides the foundational types used across all other Brickline crates:
//! - `BricklineError` — unified error taxonomy
//! - `Position` — path addressing into a pipeline document
//! - `BrickNode` / `Expression` / `PipelineDocument` — the pipeline tree model
//! - `BrickDefinition` — registry metadata (category, input schema)
//! - `Annotation` — positioned diagnostics produced by analysis passes
//! - `Existence` / `Snapshot` — variable existence lattice and scope snapshots

pub mod annotation;
pub mod brick;
pub mod document;
pub mod position;
pub mod snapshot;
pub mod trace;

pub use annotation::{ActionCallback, ActionCommand, Annotation, AnnotationAction, Severity};
pub use brick::{
    BrickCategory, BrickDefinition, InputSchema, PipelineFlavor, PropertySchema, VariableBinding,
    PIPELINE_SCHEMA_REF,
};
pub use document::{
    contains_template_syntax, BrickNode, Expression, Pipeline, PipelineDocument, TemplateEngine,
};
pub use position::{Position, Segment};
pub use snapshot::{root_variable, Existence, Snapshot};
pub use trace::{pointer_tokens, TraceError, TraceRecord, ValidationSubError};

/// Unified error type for all Brickline subsystems.
#[derive(Debug, thiserror::Error)]
pub enum BricklineError {
    // === Document Errors ===
    #[error("Invalid expression: {0}")]
    InvalidExpression(String),

    #[error("Invalid position '{path}': {message}")]
    InvalidPosition { path: String, message: String },

    // === Collaborator Errors ===
    #[error("Registry lookup failed: {0}")]
    Registry(String),

    #[error("Permission check for '{origin}' failed: {message}")]
    Permission { origin: String, message: String },

    // === Analysis Errors ===
    #[error("Pipeline validation failed: {0}")]
    ValidationError(String),

    #[error("Analysis pass '{pass}' failed: {message}")]
    PassFailed { pass: String, message: String },

    // === Generic ===
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl BricklineError {
    /// Returns `true` for errors raised by an external collaborator (registry,
    /// permission oracle). Analysis degrades instead of failing on these.
    pub fn is_collaborator_fault(&self) -> bool {
        matches!(
            self,
            BricklineError::Registry(_) | BricklineError::Permission { .. }
        )
    }
}

/// A convenience alias for `Result<T, BricklineError>`.
pub type Result<T> = std::result::Result<T, BricklineError>;
