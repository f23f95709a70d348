//! Network permission checks for the HTTP request brick.
//!
//! Literal URLs are validated synchronously while walking. Origins that need
//! an oracle round-trip are collected and checked together in one
//! [`join_all`] after the walk, so traversal never waits on IO. A failed
//! check counts as "permission absent".

use std::sync::{Arc, OnceLock, RwLock};

use async_trait::async_trait;
use futures::future::join_all;
use regex::Regex;
use serde_json::Value;

use brickline_types::{
    ActionCallback, ActionCommand, Annotation, AnnotationAction, BrickNode, BricklineError,
    Expression, PipelineDocument, Position, Result, Segment,
};

use super::{collect, AnalysisPass};
use crate::registry::BrickCatalog;
use crate::traversal::{walk_node, PipelineVisitor, VisitContext};

pub const REQUEST_PERMISSIONS_ANALYSIS_ID: &str = "requestPermissions";

const URL_PROPERTY: &str = "url";
const INTEGRATION_PROPERTY: &str = "integrationConfig";

// ---------------------------------------------------------------------------
// PermissionOracle
// ---------------------------------------------------------------------------

#[async_trait]
pub trait PermissionOracle: Send + Sync {
    /// Whether requests to `url` are currently permitted.
    async fn has_origin(&self, url: &str) -> Result<bool>;

    /// Ask for access to `origin`. Returns whether it was granted.
    async fn request_origin(&self, _origin: &str) -> Result<bool> {
        Ok(false)
    }
}

/// Oracle backed by a fixed list of origin patterns such as
/// `https://api.example.com/*` or `https://*.example.com/*`.
#[derive(Debug, Default)]
pub struct StaticPermissionOracle {
    patterns: RwLock<Vec<Regex>>,
    grant_requests: bool,
}

impl StaticPermissionOracle {
    pub fn new<I, S>(patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|p| compile_origin_pattern(p.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            patterns: RwLock::new(patterns),
            grant_requests: false,
        })
    }

    /// Grant every requested origin instead of refusing.
    pub fn granting_requests(mut self) -> Self {
        self.grant_requests = true;
        self
    }

    fn matches(&self, url: &str) -> bool {
        match self.patterns.read() {
            Ok(patterns) => patterns.iter().any(|p| p.is_match(url)),
            Err(poisoned) => poisoned.into_inner().iter().any(|p| p.is_match(url)),
        }
    }
}

/// Translate an origin pattern into an anchored regex. `*` matches any run
/// of characters; a bare origin also matches every path beneath it.
fn compile_origin_pattern(pattern: &str) -> Result<Regex> {
    if pattern == "<all_urls>" {
        return Regex::new(r"^https?://").map_err(|e| BricklineError::Other(e.to_string()));
    }
    let mut source = regex::escape(pattern).replace(r"\*", ".*");
    if !pattern.contains('*') {
        source = format!("{}(?:[/?#].*)?", source.trim_end_matches('/'));
    }
    Regex::new(&format!("^{source}$")).map_err(|e| BricklineError::Permission {
        origin: pattern.to_string(),
        message: e.to_string(),
    })
}

#[async_trait]
impl PermissionOracle for StaticPermissionOracle {
    async fn has_origin(&self, url: &str) -> Result<bool> {
        Ok(self.matches(url))
    }

    async fn request_origin(&self, origin: &str) -> Result<bool> {
        if !self.grant_requests {
            return Ok(false);
        }
        let compiled = compile_origin_pattern(origin)?;
        match self.patterns.write() {
            Ok(mut patterns) => patterns.push(compiled),
            Err(poisoned) => poisoned.into_inner().push(compiled),
        }
        tracing::info!(origin, "Granted origin permission");
        Ok(true)
    }
}

// ---------------------------------------------------------------------------
// URL parsing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
struct ParsedUrl {
    scheme: String,
    host: String,
}

impl ParsedUrl {
    fn parse(url: &str) -> Option<Self> {
        static PATTERN: OnceLock<Regex> = OnceLock::new();
        let pattern = PATTERN.get_or_init(|| {
            Regex::new(r"^([A-Za-z][A-Za-z0-9+.\-]*)://([^/?#\s@]+@)?([^/?#\s:@]+)(:\d+)?([/?#]\S*)?$")
                .unwrap()
        });
        let caps = pattern.captures(url.trim())?;
        let port = caps.get(4).map_or("", |m| m.as_str());
        Some(Self {
            scheme: caps[1].to_ascii_lowercase(),
            host: format!("{}{port}", caps[3].to_ascii_lowercase()),
        })
    }

    fn is_http(&self) -> bool {
        self.scheme == "http" || self.scheme == "https"
    }

    fn origin(&self) -> String {
        format!("{}://{}", self.scheme, self.host)
    }
}

// ---------------------------------------------------------------------------
// Pass
// ---------------------------------------------------------------------------

pub struct RequestPermissionAnalysis {
    oracle: Option<Arc<dyn PermissionOracle>>,
    brick_id: String,
}

impl RequestPermissionAnalysis {
    pub fn new(oracle: Option<Arc<dyn PermissionOracle>>, brick_id: impl Into<String>) -> Self {
        Self {
            oracle,
            brick_id: brick_id.into(),
        }
    }
}

/// Where the "request permission" action appends granted origins.
pub fn permissions_origins_path() -> Position {
    Position::from_segments([Segment::from("permissions"), Segment::from("origins")])
}

#[derive(Debug)]
struct PendingCheck {
    position: Position,
    url: String,
    origin: String,
}

#[async_trait]
impl AnalysisPass for RequestPermissionAnalysis {
    fn id(&self) -> &str {
        REQUEST_PERMISSIONS_ANALYSIS_ID
    }

    async fn analyze(
        &self,
        document: &PipelineDocument,
        catalog: &BrickCatalog,
    ) -> Result<Vec<Annotation>> {
        let visitor = PermissionVisitor {
            brick_id: &self.brick_id,
            annotations: Vec::new(),
            pending: Vec::new(),
        };
        let PermissionVisitor {
            mut annotations,
            pending,
            ..
        } = collect(visitor, document, catalog);

        let Some(oracle) = &self.oracle else {
            tracing::debug!(pending = pending.len(), "No permission oracle; skipping origin checks");
            return Ok(annotations);
        };

        let results = join_all(pending.iter().map(|check| oracle.has_origin(&check.url))).await;
        for (check, result) in pending.into_iter().zip(results) {
            let granted = result.unwrap_or_else(|err| {
                tracing::warn!(origin = %check.origin, error = %err, "Permission check failed; treating as absent");
                false
            });
            if !granted {
                annotations.push(missing_permission(oracle.clone(), check));
            }
        }
        Ok(annotations)
    }
}

fn missing_permission(oracle: Arc<dyn PermissionOracle>, check: PendingCheck) -> Annotation {
    let pattern = format!("{}/*", check.origin);
    let requested = pattern.clone();
    let callback = ActionCallback::new(move || {
        let oracle = oracle.clone();
        let origin = requested.clone();
        async move {
            if oracle.request_origin(&origin).await? {
                Ok(())
            } else {
                Err(BricklineError::Permission {
                    origin,
                    message: "permission was not granted".into(),
                })
            }
        }
    });
    Annotation::warning(
        REQUEST_PERMISSIONS_ANALYSIS_ID,
        check.position,
        format!("Missing permission to make requests to {}", check.origin),
    )
    .with_action(
        AnnotationAction::new(
            "Request permission",
            ActionCommand::AppendValue {
                path: permissions_origins_path(),
                value: Value::String(pattern),
            },
        )
        .with_callback(callback),
    )
    .with_detail(serde_json::json!({ "origin": check.origin }))
}

struct PermissionVisitor<'a> {
    brick_id: &'a str,
    annotations: Vec<Annotation>,
    pending: Vec<PendingCheck>,
}

impl PermissionVisitor<'_> {
    fn check(&mut self, position: &Position, node: &BrickNode) {
        let uses_integration = node
            .config
            .get(INTEGRATION_PROPERTY)
            .is_some_and(|expr| !matches!(expr, Expression::Literal(Value::Null)));
        if uses_integration {
            return;
        }
        let Some(url) = node
            .config
            .get(URL_PROPERTY)
            .and_then(|expr| expr.static_value())
            .and_then(|value| value.as_str().map(str::to_string))
        else {
            return;
        };
        let url_position = position.config_field(URL_PROPERTY);

        let Some(parsed) = ParsedUrl::parse(&url) else {
            self.annotations.push(Annotation::error(
                REQUEST_PERMISSIONS_ANALYSIS_ID,
                url_position,
                format!("Invalid URL: {url}"),
            ));
            return;
        };
        if !parsed.is_http() {
            self.annotations.push(Annotation::error(
                REQUEST_PERMISSIONS_ANALYSIS_ID,
                url_position,
                format!("Unsupported protocol: {}:. Use https:", parsed.scheme),
            ));
            return;
        }
        self.pending.push(PendingCheck {
            position: url_position,
            url,
            origin: parsed.origin(),
        });
    }
}

impl PipelineVisitor for PermissionVisitor<'_> {
    fn visit_node(&mut self, position: &Position, node: &BrickNode, ctx: &VisitContext<'_>) {
        if node.id == self.brick_id {
            self.check(position, node);
        }
        walk_node(self, position, node, ctx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::passes::test_support::catalog;
    use crate::registry::HTTP_BRICK_ID;
    use brickline_types::Severity;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn http(url: Expression) -> BrickNode {
        BrickNode::new(HTTP_BRICK_ID)
            .with_output_key("response")
            .with_config("url", url)
    }

    async fn analyze_with(
        oracle: Option<Arc<dyn PermissionOracle>>,
        nodes: Vec<BrickNode>,
    ) -> Vec<Annotation> {
        RequestPermissionAnalysis::new(oracle, HTTP_BRICK_ID)
            .analyze(&PipelineDocument::new(nodes), &catalog())
            .await
            .unwrap()
    }

    /// Counts calls and fails for hosts containing "flaky".
    struct CountingOracle {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PermissionOracle for CountingOracle {
        async fn has_origin(&self, url: &str) -> Result<bool> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if url.contains("flaky") {
                return Err(BricklineError::Other("oracle unavailable".into()));
            }
            Ok(url.contains("allowed"))
        }
    }

    #[test]
    fn parses_origins() {
        let parsed = ParsedUrl::parse("HTTPS://Api.Example.com:8443/v1?q=1").unwrap();
        assert_eq!(parsed.origin(), "https://api.example.com:8443");
        assert!(ParsedUrl::parse("not a url").is_none());
        assert!(ParsedUrl::parse("https://").is_none());
        assert!(!ParsedUrl::parse("ftp://files.example.com").unwrap().is_http());
    }

    #[test]
    fn static_patterns() {
        let oracle =
            StaticPermissionOracle::new(["https://api.example.com", "https://*.cdn.net/*"]).unwrap();
        assert!(oracle.matches("https://api.example.com/v1/users"));
        assert!(oracle.matches("https://api.example.com"));
        assert!(!oracle.matches("https://api.example.com.evil.org/"));
        assert!(oracle.matches("https://img.cdn.net/a.png"));
        assert!(!oracle.matches("http://img.cdn.net/a.png"));
    }

    #[tokio::test]
    async fn malformed_and_non_http_urls_are_errors() {
        let anns = analyze_with(
            None,
            vec![
                http(Expression::literal("::nope::")),
                http(Expression::literal("ftp://files.example.com/x")),
            ],
        )
        .await;
        assert_eq!(anns.len(), 2);
        assert!(anns.iter().all(|a| a.severity == Severity::Error));
        assert!(anns[0].message.starts_with("Invalid URL"));
        assert!(anns[1].message.contains("ftp"));
    }

    #[tokio::test]
    async fn absent_permission_warns_and_failed_check_counts_as_absent() {
        let oracle = Arc::new(CountingOracle {
            calls: AtomicUsize::new(0),
        });
        let anns = analyze_with(
            Some(oracle.clone()),
            vec![
                http(Expression::literal("https://allowed.example.com/a")),
                http(Expression::literal("https://denied.example.com/b")),
                http(Expression::literal("https://flaky.example.com/c")),
                http(Expression::var("@input.url")),
            ],
        )
        .await;
        assert_eq!(oracle.calls.load(Ordering::SeqCst), 3);
        let paths: Vec<_> = anns.iter().map(|a| a.position.path()).collect();
        assert_eq!(paths, vec!["pipeline.1.config.url", "pipeline.2.config.url"]);
        assert!(anns.iter().all(|a| a.severity == Severity::Warning));
        assert_eq!(
            anns[0].actions[0].command,
            ActionCommand::AppendValue {
                path: permissions_origins_path(),
                value: Value::String("https://denied.example.com/*".into()),
            }
        );
    }

    #[tokio::test]
    async fn integration_config_skips_check() {
        let node = http(Expression::literal("https://denied.example.com"))
            .with_config("integrationConfig", Expression::var("@input.integration"));
        let oracle: Arc<dyn PermissionOracle> =
            Arc::new(StaticPermissionOracle::new(Vec::<String>::new()).unwrap());
        assert!(analyze_with(Some(oracle), vec![node]).await.is_empty());
    }

    #[tokio::test]
    async fn request_action_asks_oracle() {
        let oracle: Arc<dyn PermissionOracle> = Arc::new(
            StaticPermissionOracle::new(Vec::<String>::new())
                .unwrap()
                .granting_requests(),
        );
        let anns = analyze_with(
            Some(oracle.clone()),
            vec![http(Expression::literal("https://api.example.com/data"))],
        )
        .await;
        assert_eq!(anns.len(), 1);
        let callback = anns[0].actions[0].callback.as_ref().unwrap();
        callback.invoke().await.unwrap();

        let rerun = analyze_with(
            Some(oracle),
            vec![http(Expression::literal("https://api.example.com/data"))],
        )
        .await;
        assert!(rerun.is_empty());
    }

    #[tokio::test]
    async fn refused_request_surfaces_permission_error() {
        let oracle: Arc<dyn PermissionOracle> =
            Arc::new(StaticPermissionOracle::new(Vec::<String>::new()).unwrap());
        let anns = analyze_with(
            Some(oracle),
            vec![http(Expression::literal("https://api.example.com/data"))],
        )
        .await;
        let callback = anns[0].actions[0].callback.as_ref().unwrap();
        let err = callback.invoke().await.unwrap_err();
        assert!(err.is_collaborator_fault());
    }
}
