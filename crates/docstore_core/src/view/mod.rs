//! View engine: map-source compilation, key collation and view naming.
//!
//! # Responsibility
//! - Compile stored map sources into evaluable programs.
//! - Order emitted rows by view key collation.
//!
//! # Invariants
//! - Map evaluation never panics; unreadable paths evaluate to `null`.
//! - Row ordering is deterministic: collated key, then document id.

pub mod collate;
pub mod map;

pub use collate::collate;
pub use map::{MapCompileError, MapProgram};

/// Splits a view reference into `(design_id, view_name)`.
///
/// Accepts `"<ddoc>/<view>"`, `"_design/<ddoc>/<view>"` and the short
/// `"<name>"` form, which resolves to view `<name>` of `_design/<name>`.
pub fn resolve_view_name(view: &str) -> Option<(String, String)> {
    let trimmed = view.trim();
    let trimmed = trimmed.strip_prefix("_design/").unwrap_or(trimmed);
    let (design, name) = match trimmed.split_once('/') {
        Some((design, name)) => (design, name),
        None => (trimmed, trimmed),
    };
    if design.is_empty() || name.is_empty() || name.contains('/') {
        return None;
    }
    Some((format!("_design/{design}"), name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::resolve_view_name;

    #[test]
    fn resolves_short_and_qualified_names() {
        assert_eq!(
            resolve_view_name("notes"),
            Some(("_design/notes".to_string(), "notes".to_string()))
        );
        assert_eq!(
            resolve_view_name("app/by_tag"),
            Some(("_design/app".to_string(), "by_tag".to_string()))
        );
        assert_eq!(
            resolve_view_name("_design/app/by_tag"),
            Some(("_design/app".to_string(), "by_tag".to_string()))
        );
        assert_eq!(resolve_view_name(""), None);
        assert_eq!(resolve_view_name("a/b/c"), None);
    }
}
