use crate::crds::DeclarationError;
use crate::tasks::config::ControllerConfig;
use crate::tasks::metrics::MetricsSink;
use crate::tasks::status::StatusAggregator;
use crate::tasks::store::{EventSink, StatusSink};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Kubernetes error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Invalid dependency declaration: {0}")]
    InvalidDeclaration(#[from] DeclarationError),

    #[error("circular dependency detected: {}", .path.join(" → "))]
    CircularDependency { path: Vec<String> },

    #[error("Failed to {operation}: {reason}")]
    CollaboratorError { operation: String, reason: String },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Missing object key: {0}")]
    MissingObjectKey(&'static str),
}

impl Error {
    pub fn collaborator(operation: impl Into<String>, reason: impl ToString) -> Self {
        Error::CollaboratorError {
            operation: operation.into(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Shared state handed to every reconcile call
#[derive(Clone)]
pub struct Context {
    pub config: Arc<ControllerConfig>,
    pub aggregator: StatusAggregator,
    pub status: Arc<dyn StatusSink>,
    pub events: Arc<dyn EventSink>,
    pub metrics: Arc<dyn MetricsSink>,
}
