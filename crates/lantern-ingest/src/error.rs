//! Ingestion error taxonomy
//!
//! Per-record errors ([`ErrorKind::Format`], [`ErrorKind::Parse`],
//! [`ErrorKind::Ambiguous`], [`ErrorKind::Store`]) are caught at the batch
//! boundary. Cancellation errors always propagate to the caller.

use lantern_common::cancel::OpError;
use thiserror::Error;

use crate::chpl::parse::FormatError;
use crate::models::ProductKey;
use crate::pipeline::BatchCanceled;
use crate::reconcile::{Ambiguity, ResolveError};
use crate::store::StoreError;

pub type Result<T> = std::result::Result<T, IngestError>;

#[derive(Debug, Error)]
pub enum IngestError {
    /// Malformed composite field, URL or message shape
    #[error("Format error: {0}")]
    Format(#[from] FormatError),

    /// Non-numeric certification edition
    #[error("Parse error: {0}")]
    Parse(#[from] ResolveError),

    #[error("{key}: {ambiguity} - unknown precedence for updates")]
    ConflictAmbiguous { key: ProductKey, ambiguity: Ambiguity },

    #[error("operation canceled before it started")]
    CanceledBeforeStart,

    #[error("the operation completed despite the cancellation signal")]
    CompletedDespiteCancellation,

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("store task failed: {0}")]
    TaskFailed(String),

    /// Batch stopped by the cancellation signal, with its partial report
    #[error(transparent)]
    Canceled(Box<BatchCanceled>),

    /// Non-store work abandoned because the signal fired
    #[error("canceled while {stage}")]
    Aborted { stage: &'static str },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{url} returned HTTP {status}")]
    HttpStatus { url: String, status: u16 },

    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Coarse classification for logs and batch reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Format,
    Parse,
    Ambiguous,
    Store,
    Cancellation,
    Transport,
    Decode,
    Config,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Format => "format",
            Self::Parse => "parse",
            Self::Ambiguous => "ambiguous",
            Self::Store => "store",
            Self::Cancellation => "cancellation",
            Self::Transport => "transport",
            Self::Decode => "decode",
            Self::Config => "config",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl IngestError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Format(_) => ErrorKind::Format,
            Self::Parse(_) => ErrorKind::Parse,
            Self::ConflictAmbiguous { .. } => ErrorKind::Ambiguous,
            Self::Store(_) | Self::TaskFailed(_) => ErrorKind::Store,
            Self::CanceledBeforeStart
            | Self::CompletedDespiteCancellation
            | Self::Canceled(_)
            | Self::Aborted { .. } => ErrorKind::Cancellation,
            Self::Http(_) | Self::HttpStatus { .. } => ErrorKind::Transport,
            Self::Decode(_) => ErrorKind::Decode,
            Self::Config(_) => ErrorKind::Config,
        }
    }

    /// True when the error came from the cancellation signal, not the record.
    pub fn is_cancellation(&self) -> bool {
        self.kind() == ErrorKind::Cancellation
    }
}

impl From<OpError<StoreError>> for IngestError {
    fn from(err: OpError<StoreError>) -> Self {
        match err {
            OpError::CanceledBeforeStart => Self::CanceledBeforeStart,
            OpError::CompletedDespiteCancellation => Self::CompletedDespiteCancellation,
            OpError::TaskFailed(msg) => Self::TaskFailed(msg),
            OpError::Failed(e) => Self::Store(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrapper_errors_keep_their_class() {
        let canceled: IngestError = OpError::<StoreError>::CanceledBeforeStart.into();
        assert!(canceled.is_cancellation());

        let completed: IngestError = OpError::<StoreError>::CompletedDespiteCancellation.into();
        assert!(completed.is_cancellation());

        let store: IngestError = OpError::Failed(StoreError::not_found("Product", "x")).into();
        assert_eq!(store.kind(), ErrorKind::Store);
    }

    #[test]
    fn test_parse_and_ambiguity_are_distinct() {
        let parse = IngestError::Parse(ResolveError::Edition {
            side: crate::reconcile::Side::Incoming,
            value: "abc".to_string(),
        });
        let ambiguous = IngestError::ConflictAmbiguous {
            key: ProductKey { name: "Carefluence Open API".to_string(), version: "1".to_string() },
            ambiguity: Ambiguity::CriteriaDiffer,
        };
        assert_eq!(parse.kind(), ErrorKind::Parse);
        assert_eq!(ambiguous.kind(), ErrorKind::Ambiguous);
        assert_eq!(
            ambiguous.to_string(),
            "Carefluence Open API 1: same number but unequal certification criteria - unknown precedence for updates"
        );
    }

    #[test]
    fn test_canceled_message_reports_progress() {
        let err: IngestError = BatchCanceled {
            processed: 3,
            total: 10,
            report: Default::default(),
            interrupted: None,
        }
        .into();
        assert!(err.is_cancellation());
        assert_eq!(err.to_string(), "persisted 3 out of 10 records before cancellation");
    }
}
