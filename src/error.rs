use std::io;

use thiserror::Error;

/// Errors surfaced by the recording and rendering pipeline.
#[derive(Debug, Error)]
pub enum Error {
    /// An asciicast record violates the schema: malformed JSON, wrong field
    /// types, unsupported version, or non-monotonic event times.
    #[error("malformed asciicast record: {0}")]
    MalformedRecord(String),

    /// A theme color is neither a known palette entry nor a `#rrggbb` string.
    #[error("invalid color: {0}")]
    InvalidColor(String),

    /// The SVG template is missing, unreadable, or lacks a required anchor.
    #[error("template error: {0}")]
    TemplateError(String),

    /// The recorded screen geometry is not strictly positive.
    #[error("invalid screen geometry: {columns}x{rows}")]
    GeometryError { columns: i64, rows: i64 },

    /// The downstream consumer stopped pulling; the producer unwinds.
    #[error("consumer cancelled")]
    ConsumerCancelled,

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn record(msg: impl Into<String>) -> Self {
        Error::MalformedRecord(msg.into())
    }

    pub(crate) fn template(msg: impl Into<String>) -> Self {
        Error::TemplateError(msg.into())
    }
}
