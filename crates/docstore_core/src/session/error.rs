//! Session-level error taxonomy.

use crate::session::SessionState;
use crate::store::{StoreError, StreamError};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type SessionResult<T> = Result<T, SessionError>;

#[derive(Debug)]
pub enum SessionError {
    /// The store could not be acquired.
    StoreUnavailable { name: String, source: StoreError },
    /// The store rejected deletion; the handle is still open.
    DestroyFailed { name: String, source: StoreError },
    /// Releasing the handle reported an error; the handle is gone regardless.
    CloseFailed { name: String, source: StoreError },
    WriteFailed { id: String, source: StoreError },
    QueryFailed { target: String, source: StoreError },
    StreamError(StreamError),
    /// The operation's state precondition does not hold.
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },
}

impl Display for SessionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StoreUnavailable { name, source } => {
                write!(f, "store `{name}` unavailable: {source}")
            }
            Self::DestroyFailed { name, source } => {
                write!(f, "destroying store `{name}` failed: {source}")
            }
            Self::CloseFailed { name, source } => {
                write!(f, "closing store `{name}` failed: {source}")
            }
            Self::WriteFailed { id, source } => write!(f, "writing `{id}` failed: {source}"),
            Self::QueryFailed { target, source } => {
                write!(f, "query `{target}` failed: {source}")
            }
            Self::StreamError(err) => write!(f, "{err}"),
            Self::InvalidState { operation, state } => {
                write!(f, "`{operation}` is not allowed while the session is {state}")
            }
        }
    }
}

impl Error for SessionError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::StoreUnavailable { source, .. }
            | Self::DestroyFailed { source, .. }
            | Self::CloseFailed { source, .. }
            | Self::WriteFailed { source, .. }
            | Self::QueryFailed { source, .. } => Some(source),
            Self::StreamError(err) => Some(err),
            Self::InvalidState { .. } => None,
        }
    }
}

impl From<StreamError> for SessionError {
    fn from(value: StreamError) -> Self {
        Self::StreamError(value)
    }
}
