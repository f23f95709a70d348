//! Positioned diagnostics produced by analysis passes.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use serde_json::Value;

use crate::position::Position;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Info => "info",
        })
    }
}

/// Edit a remediation action applies to the document.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ActionCommand {
    UnsetValue { path: Position },
    SetValue { path: Position, value: Value },
    AppendValue { path: Position, value: Value },
}

/// Asynchronous side effect run when the user applies an action.
#[derive(Clone)]
pub struct ActionCallback(Arc<dyn Fn() -> BoxFuture<'static, crate::Result<()>> + Send + Sync>);

impl ActionCallback {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = crate::Result<()>> + Send + 'static,
    {
        Self(Arc::new(move || f().boxed()))
    }

    pub async fn invoke(&self) -> crate::Result<()> {
        (self.0)().await
    }
}

impl fmt::Debug for ActionCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ActionCallback(..)")
    }
}

impl PartialEq for ActionCallback {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// A remediation the editor can offer next to an annotation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnnotationAction {
    pub caption: String,
    pub command: ActionCommand,
    #[serde(skip)]
    pub callback: Option<ActionCallback>,
}

impl AnnotationAction {
    pub fn new(caption: impl Into<String>, command: ActionCommand) -> Self {
        Self {
            caption: caption.into(),
            command,
            callback: None,
        }
    }

    pub fn with_callback(mut self, callback: ActionCallback) -> Self {
        self.callback = Some(callback);
        self
    }
}

/// A diagnostic attached to a document position.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Annotation {
    pub position: Position,
    pub message: String,
    pub severity: Severity,
    /// Id of the pass that produced the annotation.
    pub analysis_id: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<AnnotationAction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<Value>,
}

impl Annotation {
    pub fn new(
        analysis_id: impl Into<String>,
        severity: Severity,
        position: Position,
        message: impl Into<String>,
    ) -> Self {
        Self {
            position,
            message: message.into(),
            severity,
            analysis_id: analysis_id.into(),
            actions: Vec::new(),
            detail: None,
        }
    }

    pub fn error(analysis_id: impl Into<String>, position: Position, message: impl Into<String>) -> Self {
        Self::new(analysis_id, Severity::Error, position, message)
    }

    pub fn warning(analysis_id: impl Into<String>, position: Position, message: impl Into<String>) -> Self {
        Self::new(analysis_id, Severity::Warning, position, message)
    }

    pub fn info(analysis_id: impl Into<String>, position: Position, message: impl Into<String>) -> Self {
        Self::new(analysis_id, Severity::Info, position, message)
    }

    pub fn with_action(mut self, action: AnnotationAction) -> Self {
        self.actions.push(action);
        self
    }

    pub fn with_detail(mut self, detail: Value) -> Self {
        self.detail = Some(detail);
        self
    }
}
