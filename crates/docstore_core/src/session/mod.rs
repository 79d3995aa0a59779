//! Session lifecycle orchestration.
//!
//! # Responsibility
//! - Own at most one store handle and sequence open/destroy/populate/subscribe.
//! - Record every step in an append-only, user-visible log.
//! - Surface failures through the log without crashing the host.
//!
//! # Invariants
//! - A session never holds two handles at once.
//! - Subscriptions exist only while a handle is open.
//! - Dropping a session releases its handle and cancels its subscription.

pub mod demo;
mod error;
pub mod log_sink;
mod manager;

pub use error::{SessionError, SessionResult};
pub use log_sink::{LogEntry, LogMessage, LogSink};
pub use manager::{
    PopulateOutcome, PopulateStep, Session, SessionConfig, SessionState, SubscriptionHandle,
    SubscriptionState,
};
