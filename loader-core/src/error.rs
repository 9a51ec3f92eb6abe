use std::fmt;

use thiserror::Error;

use crate::event::Event;

/// Enumeration of errors that abort a handler pipeline for one event.
/// Capability failures are carried as the source so the full chain stays inspectable.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("failed to preprocess {path}: {source:#}")]
    Preprocess {
        path: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("failed to extract {path}: {source:#}")]
    Extract {
        path: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode {path}: {source:#}")]
    Decode {
        path: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("failed to parse {path}: {source:#}")]
    Parse {
        path: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("cannot skip {skip} leading rows, only {rows} rows were parsed")]
    SkipLeadingRows { skip: usize, rows: usize },
    #[error("failed to project row {row} (line {line}): {source:#}")]
    Projection {
        /// Index of the row in the parsed file, leading rows included.
        row: usize,
        /// 1-based line number of the row in the source file.
        line: usize,
        #[source]
        source: anyhow::Error,
    },
    #[error("projection worker for batch {batch} panicked")]
    WorkerPanicked { batch: usize },
    #[error("blocking worker was cancelled before finishing")]
    WorkerCancelled,
    #[error("failed to load {rows} rows: {source:#}")]
    Load {
        rows: usize,
        #[source]
        source: anyhow::Error,
    },
}

impl PipelineError {
    /// Short stable label, used for metrics and structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Preprocess { .. } => "preprocess",
            PipelineError::Extract { .. } => "extract",
            PipelineError::Read { .. } => "read",
            PipelineError::Decode { .. } => "decode",
            PipelineError::Parse { .. } => "parse",
            PipelineError::SkipLeadingRows { .. } => "skip_leading_rows",
            PipelineError::Projection { .. } => "projection",
            PipelineError::WorkerPanicked { .. } => "worker_panicked",
            PipelineError::WorkerCancelled => "worker_cancelled",
            PipelineError::Load { .. } => "load",
        }
    }

    /// Row index of a projection failure, if this is one.
    pub fn row(&self) -> Option<usize> {
        match self {
            PipelineError::Projection { row, .. } => Some(*row),
            _ => None,
        }
    }

    /// Source file line of a projection failure, if this is one.
    pub fn line(&self) -> Option<usize> {
        match self {
            PipelineError::Projection { line, .. } => Some(*line),
            _ => None,
        }
    }
}

/// A notifier could not deliver an outcome. Reported, never returned from a pipeline.
#[derive(Error, Debug)]
#[error("{handler} handler failed to notify: {source:#}")]
pub struct NotifyError {
    pub handler: String,
    #[source]
    pub source: anyhow::Error,
}

/// The failure of one matched handler.
#[derive(Error, Debug)]
#[error("{handler} handler failed: {source}")]
pub struct HandlerFailure {
    pub handler: String,
    #[source]
    pub source: PipelineError,
}

/// Aggregate of every matched handler that failed for one event, in registration order.
///
/// `Display` lists every failure; `source()` is the first one.
#[derive(Debug)]
pub struct DispatchError {
    pub event: Event,
    failures: Vec<HandlerFailure>,
}

impl DispatchError {
    pub(crate) fn new(event: Event, failures: Vec<HandlerFailure>) -> Self {
        debug_assert!(!failures.is_empty());
        Self { event, failures }
    }

    pub fn failures(&self) -> &[HandlerFailure] {
        &self.failures
    }

    pub fn into_failures(self) -> Vec<HandlerFailure> {
        self.failures
    }
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "failed to handle {}: {} of the matched handlers failed",
            self.event,
            self.failures.len()
        )?;
        for failure in &self.failures {
            write!(f, "; {}", failure)?;
        }
        Ok(())
    }
}

impl std::error::Error for DispatchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.failures
            .first()
            .map(|failure| -> &(dyn std::error::Error + 'static) { failure })
    }
}

/// Enumeration of errors raised while building a handler.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum BuildError {
    #[error("handler name must not be empty")]
    EmptyName,
    #[error("{handler} handler has no {capability}")]
    MissingCapability {
        handler: String,
        capability: &'static str,
    },
    #[error("{handler} handler batch size must be positive")]
    ZeroBatchSize { handler: String },
    #[error("{handler} handler concurrency limit must be positive")]
    ZeroConcurrency { handler: String },
}
