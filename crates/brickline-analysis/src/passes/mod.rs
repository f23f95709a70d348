//! Analysis passes: independent checks that each walk the document and emit
//! [`Annotation`]s.
//!
//! Every pass implements [`AnalysisPass`]. Passes are order-insensitive; the
//! [`Analyzer`](crate::Analyzer) runs each one behind its own failure
//! boundary and concatenates the results.

use async_trait::async_trait;

use brickline_types::{Annotation, PipelineDocument, Result};

use crate::registry::BrickCatalog;

pub mod brick_type;
pub mod condition;
pub mod output_key;
pub mod pattern;
pub mod permissions;
pub mod renderer;
pub mod template;
pub mod trace;

pub use brick_type::BrickTypeAnalysis;
pub use condition::ConditionAnalysis;
pub use output_key::OutputKeyAnalysis;
pub use pattern::RegexAnalysis;
pub use permissions::{PermissionOracle, RequestPermissionAnalysis, StaticPermissionOracle};
pub use renderer::RendererAnalysis;
pub use template::TemplateAnalysis;
pub use trace::TraceAnalysis;

// ---------------------------------------------------------------------------
// AnalysisPass trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait AnalysisPass: Send + Sync {
    /// Stable id, copied into every annotation the pass produces.
    fn id(&self) -> &str;

    async fn analyze(
        &self,
        document: &PipelineDocument,
        catalog: &BrickCatalog,
    ) -> Result<Vec<Annotation>>;
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Run a synchronous visitor pass over the whole document.
pub(crate) fn collect<V>(mut visitor: V, document: &PipelineDocument, catalog: &BrickCatalog) -> V
where
    V: crate::traversal::PipelineVisitor,
{
    crate::traversal::traverse(&mut visitor, document, catalog);
    visitor
}

#[cfg(test)]
pub(crate) mod test_support {
    use brickline_types::{Annotation, PipelineDocument};

    use super::AnalysisPass;
    use crate::registry::{builtin_definitions, BrickCatalog};

    pub fn catalog() -> BrickCatalog {
        builtin_definitions().into_iter().collect()
    }

    pub async fn run(pass: &dyn AnalysisPass, document: &PipelineDocument) -> Vec<Annotation> {
        pass.analyze(document, &catalog()).await.unwrap()
    }
}
