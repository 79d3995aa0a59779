//! Design documents carrying view definitions.
//!
//! # Responsibility
//! - Provide a typed builder for `{_id: "_design/..", views: {..}}`.
//! - Parse stored design documents back into view definitions.
//!
//! # Invariants
//! - Design ids always start with `_design/`.
//! - Map sources are stored verbatim; compilation happens at query time.

use crate::model::document::{Document, DocumentValidationError, DESIGN_PREFIX};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Named map function definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewDefinition {
    /// Map function source, e.g. `function (doc) { emit(doc._id) }`.
    pub map: String,
}

/// Typed design document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesignDocument {
    pub id: String,
    pub views: BTreeMap<String, ViewDefinition>,
}

impl DesignDocument {
    /// Creates a design document named `_design/<name>`.
    pub fn new(name: &str) -> Self {
        Self {
            id: format!("{DESIGN_PREFIX}{name}"),
            views: BTreeMap::new(),
        }
    }

    pub fn with_view(mut self, name: impl Into<String>, map: impl Into<String>) -> Self {
        self.views
            .insert(name.into(), ViewDefinition { map: map.into() });
        self
    }

    /// Converts into the storable document shape.
    pub fn into_document(self) -> Document {
        let views = self
            .views
            .into_iter()
            .map(|(name, view)| (name, serde_json::json!({ "map": view.map })))
            .collect::<serde_json::Map<_, _>>();
        Document::new(self.id).with_field("views", views)
    }

    /// Reads view definitions out of a stored design document.
    pub fn from_document(doc: &Document) -> Result<Self, DocumentValidationError> {
        if !doc.is_design() {
            return Err(DocumentValidationError::InvalidDesign(format!(
                "`{}` is not a design document id",
                doc.id
            )));
        }

        let views = match doc.fields.get("views") {
            None => BTreeMap::new(),
            Some(value) => serde_json::from_value::<BTreeMap<String, ViewDefinition>>(
                value.clone(),
            )
            .map_err(|err| DocumentValidationError::InvalidDesign(format!("`views`: {err}")))?,
        };

        Ok(Self {
            id: doc.id.clone(),
            views,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::DesignDocument;
    use crate::model::document::{Document, DocumentValidationError};
    use serde_json::json;

    #[test]
    fn into_document_matches_view_wire_shape() {
        let doc = DesignDocument::new("notes")
            .with_view("notes", "function (doc) { emit(doc._id) }")
            .into_document();

        assert_eq!(
            serde_json::to_value(&doc).unwrap(),
            json!({
                "_id": "_design/notes",
                "views": { "notes": { "map": "function (doc) { emit(doc._id) }" } }
            })
        );
        let parsed = DesignDocument::from_document(&doc).unwrap();
        assert_eq!(parsed.views["notes"].map, "function (doc) { emit(doc._id) }");
    }

    #[test]
    fn rejects_views_without_map_source() {
        let doc = Document::new("_design/bad").with_field("views", json!({ "v": { "map": 3 } }));
        assert!(matches!(
            doc.validate(),
            Err(DocumentValidationError::InvalidDesign(_))
        ));
    }
}
