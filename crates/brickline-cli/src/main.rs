//! CLI binary for linting and inspecting brick pipeline documents.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use brickline_analysis::{
    builtin_registry, normalize, AnalysisConfig, AnalysisReport, Analyzer, StaticPermissionOracle,
};
use brickline_types::{BrickDefinition, PipelineDocument, Severity, TraceRecord};

#[derive(Parser)]
#[command(name = "brickline", version, about = "Static analysis for brick pipeline documents")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every analysis pass and report annotations
    Lint {
        /// Path to the pipeline document (JSON)
        document: PathBuf,

        /// Extra brick definitions (JSON array), merged over the built-ins
        #[arg(short, long)]
        registry: Option<PathBuf>,

        /// Trace records from the last run (JSON array)
        #[arg(short, long)]
        trace: Option<PathBuf>,

        /// Origin pattern the permission check treats as granted (repeatable)
        #[arg(long = "allow-origin")]
        allow_origins: Vec<String>,

        /// Analysis configuration (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the variables visible on entry to every node
    Vars {
        /// Path to the pipeline document (JSON)
        document: PathBuf,

        /// Extra brick definitions (JSON array)
        #[arg(short, long)]
        registry: Option<PathBuf>,

        /// Print snapshots as JSON
        #[arg(long)]
        json: bool,
    },

    /// Assign instance ids and materialize empty sub-pipelines
    Normalize {
        /// Path to the pipeline document (JSON)
        document: PathBuf,

        /// Extra brick definitions (JSON array)
        #[arg(short, long)]
        registry: Option<PathBuf>,
    },

    /// Show information about a pipeline document
    Info {
        /// Path to the pipeline document (JSON)
        document: PathBuf,

        /// Extra brick definitions (JSON array)
        #[arg(short, long)]
        registry: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so --json output stays parseable.
    let default_filter = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Lint {
            document,
            registry,
            trace,
            allow_origins,
            config,
            json,
        } => {
            let has_error = cmd_lint(
                &document,
                registry.as_deref(),
                trace.as_deref(),
                &allow_origins,
                config.as_deref(),
                json,
            )
            .await?;
            if has_error {
                std::process::exit(1);
            }
        }
        Commands::Vars {
            document,
            registry,
            json,
        } => {
            cmd_vars(&document, registry.as_deref(), json).await?;
        }
        Commands::Normalize { document, registry } => {
            cmd_normalize(&document, registry.as_deref()).await?;
        }
        Commands::Info { document, registry } => {
            cmd_info(&document, registry.as_deref()).await?;
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

fn load_document(path: &Path) -> anyhow::Result<PipelineDocument> {
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let document = serde_json::from_str(&source)
        .with_context(|| format!("parsing pipeline document {}", path.display()))?;
    Ok(document)
}

fn load_json_array<T: serde::de::DeserializeOwned>(path: &Path, what: &str) -> anyhow::Result<Vec<T>> {
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&source).with_context(|| format!("parsing {what} {}", path.display()))
}

fn build_analyzer(registry: Option<&Path>) -> anyhow::Result<Analyzer> {
    let mut bricks = builtin_registry();
    if let Some(path) = registry {
        let extra: Vec<BrickDefinition> = load_json_array(path, "brick definitions")?;
        tracing::debug!(count = extra.len(), path = %path.display(), "Loaded brick definitions");
        bricks.extend(extra);
    }
    Ok(Analyzer::new(Arc::new(bricks)))
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// Returns whether any Error annotation was reported.
async fn cmd_lint(
    path: &Path,
    registry: Option<&Path>,
    trace: Option<&Path>,
    allow_origins: &[String],
    config: Option<&Path>,
    json: bool,
) -> anyhow::Result<bool> {
    let document = load_document(path)?;
    let mut analyzer = build_analyzer(registry)?;

    if let Some(config) = config {
        analyzer = analyzer.with_config(AnalysisConfig::from_json_file(config)?);
    }
    if let Some(trace) = trace {
        let records: Vec<TraceRecord> = load_json_array(trace, "trace records")?;
        analyzer = analyzer.with_traces(records);
    }
    if !allow_origins.is_empty() {
        analyzer = analyzer.with_oracle(Arc::new(StaticPermissionOracle::new(allow_origins)?));
    }

    let report = analyzer.analyze(&document).await;
    if json {
        println!("{}", serde_json::to_string_pretty(&report.annotations)?);
    } else {
        print_annotations(&report);
    }
    Ok(report.has_errors())
}

fn print_annotations(report: &AnalysisReport) {
    if report.annotations.is_empty() {
        println!("Pipeline is valid");
        return;
    }

    let mut annotations: Vec<_> = report.annotations.iter().collect();
    annotations.sort_by(|a, b| a.position.cmp(&b.position).then(a.severity.cmp(&b.severity)));
    for ann in annotations {
        let severity = match ann.severity {
            Severity::Error => "ERROR",
            Severity::Warning => "WARN",
            Severity::Info => "INFO",
        };
        println!("[{}] {} {}: {}", severity, ann.analysis_id, ann.position, ann.message);
        for action in &ann.actions {
            println!("    fix: {}", action.caption);
        }
    }
    for pass in &report.failed_passes {
        println!("[WARN] pass {pass} failed; its results are missing");
    }
}

async fn cmd_vars(path: &Path, registry: Option<&Path>, json: bool) -> anyhow::Result<()> {
    let document = load_document(path)?;
    let report = build_analyzer(registry)?
        .with_config(AnalysisConfig {
            check_variables: false,
            ..AnalysisConfig::default()
        })
        .analyze(&document)
        .await;

    if json {
        println!("{}", serde_json::to_string_pretty(&report.snapshots)?);
        return Ok(());
    }
    for (position, snapshot) in report.snapshots.iter() {
        let label = document
            .node_at(position)
            .map(|n| n.display_name().to_string())
            .unwrap_or_default();
        println!("{position} ({label})");
        for (name, existence) in snapshot.iter() {
            println!("    {name}: {existence}");
        }
    }
    Ok(())
}

async fn cmd_normalize(path: &Path, registry: Option<&Path>) -> anyhow::Result<()> {
    let document = load_document(path)?;
    let analyzer = build_analyzer(registry)?;
    let catalog = analyzer.resolve(&document).await;
    let normalized = normalize(&document, &catalog);
    println!("{}", serde_json::to_string_pretty(&normalized)?);
    Ok(())
}

async fn cmd_info(path: &Path, registry: Option<&Path>) -> anyhow::Result<()> {
    let document = load_document(path)?;
    let analyzer = build_analyzer(registry)?;
    let catalog = analyzer.resolve(&document).await;
    let ids = document.brick_ids();

    println!("Document: {}", path.display());
    println!("Flavor: {}", document.flavor);
    println!("Nodes: {}", document.node_count());
    println!("Distinct bricks: {}", ids.len());

    println!("\nBricks:");
    for id in &ids {
        let category = catalog
            .category(id)
            .map(|category| category.as_str())
            .unwrap_or("(unresolved)");
        println!("  {id} [{category}]");
    }
    Ok(())
}
