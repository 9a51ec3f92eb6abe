use loader_core::BuildError;
use thiserror::Error;

/// Enumeration of errors that stop the worker from starting or serving.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("invalid configuration: {0}")]
    ConfigError(#[from] envconfig::Error),
    #[error("failed to read handler definitions from {path}: {source}")]
    ReadDefinitionsError {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse handler definitions from {path}: {source}")]
    ParseDefinitionsError {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid definition of {handler} handler: {reason}")]
    InvalidDefinitionError { handler: String, reason: String },
    #[error(transparent)]
    BuildError(#[from] BuildError),
    #[error("failed to install metrics recorder: {0}")]
    MetricsError(#[from] metrics_exporter_prometheus::BuildError),
    #[error("failed to serve http: {0}")]
    ServeError(#[from] std::io::Error),
}
