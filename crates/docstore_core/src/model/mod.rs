//! Document model shared by the store, the view engine and the session.
//!
//! # Responsibility
//! - Define the wire-compatible document and attachment shapes.
//! - Validate documents before they reach persistence.
//!
//! # Invariants
//! - Every document is identified by a non-empty `_id`.
//! - Only `_id`, `_rev`, `_deleted` and `_attachments` may start with `_`.

pub mod design;
pub mod document;
