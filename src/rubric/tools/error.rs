use std::fmt;

use thiserror::Error;

use crate::rubric::tools::batch::Method;
use crate::rubric::tools::sync::SyncReport;

/// Convenient alias for fallible results returned throughout the crate.
pub type Result<T> = std::result::Result<T, ToolError>;

/// Error type covering the different failure cases that can occur when the
/// tool reads desired state, talks to the rubric API, or writes exports.
#[derive(Debug, Error)]
pub enum ToolError {
    /// Wrapper for IO failures such as reading or writing files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Raised when JSON parsing or serialization fails.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Errors bubbled up from the Excel writer implementation.
    #[error("Excel write error: {0}")]
    ExcelWrite(#[from] rust_xlsxwriter::XlsxError),

    /// Errors bubbled up from the Excel reader implementation.
    #[error("Excel read error: {0}")]
    ExcelRead(#[from] calamine::XlsxError),

    /// Transport-level failures (connection refused, TLS, timeouts).
    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    /// Missing credential or other required external configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Structural or schema violations in a record or in the desired state.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Malformed batch input, unsupported method, or unexpected response status.
    #[error(transparent)]
    Request(#[from] RequestError),

    /// Raised when a named lookup (course, assignment) yields no match.
    #[error("not found: {0}")]
    NotFound(String),

    /// Raised when a sheet does not follow the expected conventions.
    #[error("invalid workbook structure: {0}")]
    InvalidWorkbook(String),

    /// Raised when the tracing subscriber fails to initialise.
    #[error("failed to initialise logging: {0}")]
    Logging(String),

    /// A mutating batch failed after some of its items were accepted.
    #[error("{method} batch stopped after {committed} committed items: {source}")]
    BatchIncomplete {
        method: Method,
        committed: usize,
        #[source]
        source: Box<ToolError>,
    },

    /// Any error, tagged with the operation that produced it.
    #[error("{operation} failed: {source}")]
    Operation {
        operation: &'static str,
        #[source]
        source: Box<ToolError>,
    },

    /// A synchronization failed after some batches were already committed.
    /// Nothing is rolled back; `applied` records what reached the remote.
    #[error("synchronization left the rubric partially updated ({applied}): {source}")]
    PartialSync {
        applied: SyncReport,
        #[source]
        source: Box<ToolError>,
    },
}

impl ToolError {
    /// Returns the innermost error, skipping operation tags and partial-sync
    /// wrappers.
    pub fn root(&self) -> &ToolError {
        match self {
            ToolError::Operation { source, .. }
            | ToolError::PartialSync { source, .. }
            | ToolError::BatchIncomplete { source, .. } => source.root(),
            other => other,
        }
    }

    /// Name of the outermost tagged operation, if any.
    pub fn operation(&self) -> Option<&'static str> {
        match self {
            ToolError::Operation { operation, .. } => Some(operation),
            ToolError::PartialSync { source, .. } => source.operation(),
            _ => None,
        }
    }

    /// Items of a failed batch that reached the remote anyway.
    pub fn committed(&self) -> usize {
        match self {
            ToolError::BatchIncomplete { committed, .. } => *committed,
            ToolError::Operation { source, .. } => source.committed(),
            _ => 0,
        }
    }

    /// Tags the error with `operation` unless it already carries a tag.
    pub fn within(self, operation: &'static str) -> ToolError {
        match self {
            tagged @ (ToolError::Operation { .. } | ToolError::PartialSync { .. }) => tagged,
            other => ToolError::Operation {
                operation,
                source: Box::new(other),
            },
        }
    }

    pub(crate) fn config(message: impl Into<String>) -> Self {
        ToolError::Config(message.into())
    }
}

/// Tags errors with the name of the operation that produced them.
pub trait OperationContext<T> {
    /// Wraps the error with `operation` unless it is already tagged.
    fn during(self, operation: &'static str) -> Result<T>;
}

impl<T> OperationContext<T> for Result<T> {
    fn during(self, operation: &'static str) -> Result<T> {
        self.map_err(|error| error.within(operation))
    }
}

/// One failed field check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldIssue {
    /// Where the record sits, e.g. `rubric category` or `categories[1].comments[0]`.
    pub path: String,
    pub field: String,
    pub reason: String,
}

impl fmt::Display for FieldIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}: {}", self.path, self.field, self.reason)
    }
}

/// All field failures found in one record or one desired-state submission.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationError {
    pub issues: Vec<FieldIssue>,
}

impl ValidationError {
    pub fn single(
        path: impl Into<String>,
        field: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        let mut error = Self::default();
        error.push(path, field, reason);
        error
    }

    pub fn push(
        &mut self,
        path: impl Into<String>,
        field: impl Into<String>,
        reason: impl Into<String>,
    ) {
        self.issues.push(FieldIssue {
            path: path.into(),
            field: field.into(),
            reason: reason.into(),
        });
    }

    /// Appends the issues of `other`, re-rooting their paths under `path`.
    pub fn absorb(&mut self, path: &str, other: ValidationError) {
        for issue in other.issues {
            self.issues.push(FieldIssue {
                path: path.to_string(),
                ..issue
            });
        }
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    /// Returns `Ok(())` when no issue was recorded.
    pub fn into_result(self) -> std::result::Result<(), ValidationError> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }

    /// True when some issue sits at `path` and names `field`.
    pub fn mentions(&self, path: &str, field: &str) -> bool {
        self.issues
            .iter()
            .any(|issue| issue.path == path && issue.field == field)
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "validation failed")?;
        for (index, issue) in self.issues.iter().enumerate() {
            let separator = if index == 0 { ": " } else { "; " };
            write!(f, "{separator}{issue}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

/// Failures raised by the batched request layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error("unsupported request method '{0}'")]
    UnsupportedMethod(String),

    /// A batch item could not be turned into a request; nothing was sent.
    #[error("batch item {index}: {reason}")]
    MalformedItem { index: usize, reason: String },

    #[error("{method} {path} returned status {status}: {detail}")]
    UnexpectedStatus {
        method: Method,
        path: String,
        status: u16,
        detail: String,
    },
}

impl RequestError {
    pub(crate) fn malformed(index: usize, reason: impl Into<String>) -> Self {
        RequestError::MalformedItem {
            index,
            reason: reason.into(),
        }
    }

    /// HTTP status of a failed response, if this error came from one.
    pub fn status(&self) -> Option<u16> {
        match self {
            RequestError::UnexpectedStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}
