//! Static analysis for brick pipelines.
//!
//! - [`traversal`] — depth-first visitor over pipelines and the sub-pipelines
//!   discovered through brick input schemas
//! - [`var_analysis`] — which variables are definitely or possibly bound at
//!   each node
//! - [`passes`] — independent lint passes producing [`Annotation`]s
//! - [`normalize`] — instance ids and empty sub-pipelines at the editor boundary
//! - [`Analyzer`] — one batched registry lookup, then every enabled pass
//!   behind its own failure boundary
//!
//! [`Annotation`]: brickline_types::Annotation

pub mod analyzer;
pub mod normalize;
pub mod passes;
pub mod registry;
pub mod traversal;
pub mod var_analysis;

pub use analyzer::{AnalysisConfig, AnalysisReport, Analyzer};
pub use normalize::{normalize, Normalizer};
pub use passes::{AnalysisPass, PermissionOracle, StaticPermissionOracle};
pub use registry::{builtin_registry, BrickCatalog, BrickRegistry, InMemoryRegistry};
pub use traversal::{traverse, walk_node, walk_pipeline, PipelineVisitor, VisitContext};
pub use var_analysis::{SnapshotMap, VarAnalysis, VarAnalysisOutput};
