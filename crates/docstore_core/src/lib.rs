//! Core of the docstore demo: an embedded document store and the session
//! manager that drives its open/destroy/populate/subscribe lifecycle.

pub mod db;
pub mod logging;
pub mod model;
pub mod session;
pub mod store;
pub mod view;

pub use logging::{default_log_level, init_logging, logging_status, LoggingConfig, LoggingError};
pub use model::design::{DesignDocument, ViewDefinition};
pub use model::document::{Attachment, AttachmentBody, Document, DocumentValidationError};
pub use session::{
    LogEntry, LogMessage, LogSink, PopulateOutcome, PopulateStep, Session, SessionConfig,
    SessionError, SessionResult, SessionState, SubscriptionHandle, SubscriptionState,
};
pub use store::{
    AdapterRegistry, AllDocsOptions, ChangeFeed, ChangeNotification, ChangesOptions,
    ChangesSince, DocumentStore, GetOptions, OpenOptions, QueryOptions, QueryResponse, QueryRow,
    StoreAdapter, StoreError, StoreInfo, StoreResult,
};

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::{core_version, ping};

    #[test]
    fn ping_returns_pong() {
        assert_eq!(ping(), "pong");
    }

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
