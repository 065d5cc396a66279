use log::error;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Why the external cropping tool did not produce a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToolFailureKind {
    NotFound,
    TimedOut,
    MissingDependency,
    NonZeroExit,
}

impl fmt::Display for ToolFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ToolFailureKind::NotFound => "tool not found",
            ToolFailureKind::TimedOut => "tool timed out",
            ToolFailureKind::MissingDependency => "tool dependency missing",
            ToolFailureKind::NonZeroExit => "tool failed",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("{kind}: {detail}")]
pub struct ToolFailure {
    pub kind: ToolFailureKind,
    pub detail: String,
}

impl ToolFailure {
    pub fn new(kind: ToolFailureKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }
}

/// The nesting level at which a deadline fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TimeoutScope {
    Invoker,
    Item,
    Master,
}

impl fmt::Display for TimeoutScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeoutScope::Invoker => f.write_str("invoker"),
            TimeoutScope::Item => f.write_str("per-item"),
            TimeoutScope::Master => f.write_str("batch"),
        }
    }
}

/// Coarse grouping used for operator-facing messages and retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureClass {
    Timeout,
    ToolMissing,
    Rejected,
    Generic,
}

#[derive(Debug, Error)]
pub enum CropError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("anti-forgery token rejected: {0}")]
    InvalidToken(String),

    #[error("another operation is already in progress")]
    Busy,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("external tool error ({0})")]
    Tool(#[from] ToolFailure),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{0} timeout elapsed")]
    Timeout(TimeoutScope),

    #[error("operation cancelled")]
    Cancelled,

    #[error("operation aborted: {0}")]
    Aborted(String),
}

pub type CropResult<T> = Result<T, CropError>;

impl CropError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        CropError::Io {
            context: context.into(),
            source,
        }
    }

    /// Wrap an infrastructure failure from the catalog provider.
    pub fn catalog(err: anyhow::Error) -> Self {
        CropError::io(
            "catalog provider failed",
            std::io::Error::other(format!("{err:#}")),
        )
    }

    pub fn class(&self) -> FailureClass {
        match self {
            CropError::Timeout(_) => FailureClass::Timeout,
            CropError::Tool(failure) => match failure.kind {
                ToolFailureKind::TimedOut => FailureClass::Timeout,
                ToolFailureKind::NotFound | ToolFailureKind::MissingDependency => {
                    FailureClass::ToolMissing
                }
                ToolFailureKind::NonZeroExit => FailureClass::Generic,
            },
            CropError::Validation(_) | CropError::InvalidToken(_) | CropError::Busy => {
                FailureClass::Rejected
            }
            _ => FailureClass::Generic,
        }
    }

    /// Tool failures and timeouts leave no partial state behind.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CropError::Tool(_) | CropError::Timeout(_) | CropError::Busy | CropError::Cancelled
        )
    }

    pub fn user_message(&self) -> String {
        match self.class() {
            FailureClass::Timeout => format!("Timed out, safe to retry ({self})"),
            FailureClass::ToolMissing => {
                format!("Cropping tool is unavailable on the server ({self})")
            }
            FailureClass::Rejected => format!("Request rejected ({self})"),
            FailureClass::Generic => format!("Operation failed ({self})"),
        }
    }
}

/// Log the full error chain and hand the error back to the caller.
pub fn handle_error(error: anyhow::Error) -> anyhow::Error {
    let chain: Vec<String> = error.chain().map(|cause| cause.to_string()).collect();
    error!("{}", chain.join("\n  caused by: "));
    error
}
