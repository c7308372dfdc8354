//! Error types for vidgraph.

use crate::element::StageState;
use thiserror::Error;

/// Result type alias using vidgraph's Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for graph construction and control.
#[derive(Error, Debug)]
pub enum Error {
    /// A stage with this name is already registered in the graph.
    #[error("duplicate stage name: {0}")]
    DuplicateName(String),

    /// Both pads of a static link carry known but incompatible media types.
    #[error("incompatible pads {src} -> {sink}: {src_caps} does not match {sink_caps}")]
    IncompatiblePad {
        /// Source pad (`stage.pad`).
        src: String,
        /// Sink pad (`stage.pad`).
        sink: String,
        /// Media type on the source pad.
        src_caps: String,
        /// Media type on the sink pad.
        sink_caps: String,
    },

    /// A required stage could not be instantiated.
    #[error("cannot construct stage '{stage}': {reason}")]
    Construction {
        /// Requested stage name or factory.
        stage: String,
        /// Why construction failed.
        reason: String,
    },

    /// A dynamic pad resolved to an unsupported media descriptor.
    #[error("negotiation failed on '{stage}': {reason}")]
    Negotiation {
        /// The stage whose pad failed to resolve.
        stage: String,
        /// Diagnostic.
        reason: String,
    },

    /// Asynchronous failure reported mid-stream.
    #[error("runtime error in '{stage}': {reason}")]
    Runtime {
        /// Reporting stage.
        stage: String,
        /// Diagnostic.
        reason: String,
    },

    /// A stage could not complete a lifecycle transition.
    #[error("stage '{stage}' failed {from:?} -> {to:?}: {reason}")]
    StateChange {
        /// The stage that failed.
        stage: String,
        /// State it stayed in.
        from: StageState,
        /// State that was requested.
        to: StageState,
        /// Diagnostic.
        reason: String,
    },

    /// Link request rejected before any type check (unknown pad, same stage, ...).
    #[error("invalid link: {0}")]
    InvalidLink(String),

    /// A stage, pad or factory was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Launch description or caps string could not be parsed.
    #[error("parse error: {0}")]
    Parse(String),

    /// Invalid configuration value.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn construction(stage: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Construction {
            stage: stage.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn negotiation(stage: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Negotiation {
            stage: stage.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error belongs to the construction phase (fatal before any transition).
    pub fn is_construction(&self) -> bool {
        matches!(
            self,
            Error::Construction { .. }
                | Error::IncompatiblePad { .. }
                | Error::DuplicateName(_)
                | Error::InvalidLink(_)
        )
    }
}
