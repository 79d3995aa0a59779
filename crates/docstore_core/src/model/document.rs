//! Document and attachment model.
//!
//! # Responsibility
//! - Map the JSON document shape (`_id`, `_rev`, body fields,
//!   `_attachments`) onto typed Rust values.
//! - Carry attachment payloads as raw bytes, base64 only on the wire.
//!
//! # Invariants
//! - Body fields never contain reserved `_`-prefixed keys.
//! - Attachment digests are derived from payload bytes, never trusted from input.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Id prefix reserved for design documents.
pub const DESIGN_PREFIX: &str = "_design/";

/// Document as stored and returned by a document store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(rename = "_id")]
    pub id: String,
    /// Current revision; `None` for documents that were never stored.
    #[serde(rename = "_rev", default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    /// Tombstone marker.
    #[serde(rename = "_deleted", default, skip_serializing_if = "is_false")]
    pub deleted: bool,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
    #[serde(
        rename = "_attachments",
        default,
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub attachments: BTreeMap<String, Attachment>,
}

/// Named binary attachment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "AttachmentWire", into = "AttachmentWire")]
pub struct Attachment {
    pub content_type: String,
    pub body: AttachmentBody,
}

/// Attachment payload: inline bytes, or a stub that refers to stored bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachmentBody {
    Inline(Vec<u8>),
    Stub { digest: String, length: u64 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AttachmentWire {
    content_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    digest: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    length: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    stub: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<String>,
}

impl TryFrom<AttachmentWire> for Attachment {
    type Error = String;

    fn try_from(value: AttachmentWire) -> Result<Self, Self::Error> {
        if value.stub == Some(true) {
            let digest = value
                .digest
                .ok_or_else(|| "attachment stub requires `digest`".to_string())?;
            return Ok(Self {
                content_type: value.content_type,
                body: AttachmentBody::Stub {
                    digest,
                    length: value.length.unwrap_or(0),
                },
            });
        }

        let data = value
            .data
            .ok_or_else(|| "attachment requires `data` or `stub: true`".to_string())?;
        let bytes = BASE64
            .decode(data.as_bytes())
            .map_err(|err| format!("attachment data is not valid base64: {err}"))?;
        Ok(Self {
            content_type: value.content_type,
            body: AttachmentBody::Inline(bytes),
        })
    }
}

impl From<Attachment> for AttachmentWire {
    fn from(value: Attachment) -> Self {
        match value.body {
            AttachmentBody::Inline(bytes) => Self {
                content_type: value.content_type,
                digest: Some(attachment_digest(&bytes)),
                length: None,
                stub: None,
                data: Some(BASE64.encode(bytes)),
            },
            AttachmentBody::Stub { digest, length } => Self {
                content_type: value.content_type,
                digest: Some(digest),
                length: Some(length),
                stub: Some(true),
                data: None,
            },
        }
    }
}

impl Attachment {
    /// Creates an inline attachment from raw bytes.
    pub fn inline(content_type: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            content_type: content_type.into(),
            body: AttachmentBody::Inline(data.into()),
        }
    }

    /// Creates an inline attachment from a base64 payload.
    pub fn from_base64(
        content_type: impl Into<String>,
        data: &str,
    ) -> Result<Self, DocumentValidationError> {
        let bytes = BASE64
            .decode(data.as_bytes())
            .map_err(|err| DocumentValidationError::InvalidAttachmentData(err.to_string()))?;
        Ok(Self::inline(content_type, bytes))
    }

    /// Returns inline bytes, or `None` for stubs.
    pub fn data(&self) -> Option<&[u8]> {
        match &self.body {
            AttachmentBody::Inline(bytes) => Some(bytes.as_slice()),
            AttachmentBody::Stub { .. } => None,
        }
    }
}

/// Returns the content digest used for stored attachments (`sha256-<base64>`).
pub fn attachment_digest(data: &[u8]) -> String {
    format!("sha256-{}", BASE64.encode(Sha256::digest(data)))
}

/// Validation failures for document writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentValidationError {
    EmptyId,
    ReservedId(String),
    ReservedField(String),
    EmptyAttachmentName,
    MissingContentType(String),
    InvalidAttachmentData(String),
    UnknownAttachmentStub(String),
    InvalidDesign(String),
}

impl Display for DocumentValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyId => write!(f, "document `_id` cannot be empty"),
            Self::ReservedId(id) => write!(f, "document id `{id}` uses a reserved prefix"),
            Self::ReservedField(name) => {
                write!(f, "field `{name}` is reserved for document metadata")
            }
            Self::EmptyAttachmentName => write!(f, "attachment name cannot be empty"),
            Self::MissingContentType(name) => {
                write!(f, "attachment `{name}` requires a content_type")
            }
            Self::InvalidAttachmentData(message) => {
                write!(f, "invalid attachment data: {message}")
            }
            Self::UnknownAttachmentStub(name) => {
                write!(f, "attachment stub `{name}` does not match a stored attachment")
            }
            Self::InvalidDesign(message) => write!(f, "invalid design document: {message}"),
        }
    }
}

impl Error for DocumentValidationError {}

impl Document {
    /// Creates an empty, never-stored document.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            rev: None,
            deleted: false,
            fields: Map::new(),
            attachments: BTreeMap::new(),
        }
    }

    /// Sets one body field.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Adds one named attachment.
    pub fn with_attachment(mut self, name: impl Into<String>, attachment: Attachment) -> Self {
        self.attachments.insert(name.into(), attachment);
        self
    }

    pub fn is_design(&self) -> bool {
        self.id.starts_with(DESIGN_PREFIX)
    }

    /// Resolves a dotted field path the way a map function reads `doc.a.b`.
    ///
    /// Metadata paths (`_id`, `_rev`, `_deleted`) resolve against the
    /// document header. Array segments accept numeric indices.
    pub fn lookup(&self, path: &[String]) -> Option<Value> {
        let (first, rest) = path.split_first()?;
        let root = match first.as_str() {
            "_id" => Value::String(self.id.clone()),
            "_rev" => Value::String(self.rev.clone()?),
            "_deleted" => Value::Bool(self.deleted),
            name => self.fields.get(name)?.clone(),
        };

        rest.iter().try_fold(root, |current, segment| match current {
            Value::Object(mut map) => map.remove(segment.as_str()),
            Value::Array(mut items) => {
                let index = segment.parse::<usize>().ok()?;
                (index < items.len()).then(|| items.swap_remove(index))
            }
            _ => None,
        })
    }

    /// Validates identity, reserved fields, attachments and design shape.
    pub fn validate(&self) -> Result<(), DocumentValidationError> {
        if self.id.trim().is_empty() {
            return Err(DocumentValidationError::EmptyId);
        }
        if self.id.starts_with('_') && !self.is_design() {
            return Err(DocumentValidationError::ReservedId(self.id.clone()));
        }
        if self.is_design() && self.id.len() == DESIGN_PREFIX.len() {
            return Err(DocumentValidationError::InvalidDesign(
                "design document name cannot be empty".to_string(),
            ));
        }
        if let Some(name) = self.fields.keys().find(|name| name.starts_with('_')) {
            return Err(DocumentValidationError::ReservedField(name.clone()));
        }

        for (name, attachment) in &self.attachments {
            if name.trim().is_empty() {
                return Err(DocumentValidationError::EmptyAttachmentName);
            }
            if attachment.content_type.trim().is_empty() {
                return Err(DocumentValidationError::MissingContentType(name.clone()));
            }
        }

        if self.is_design() && !self.deleted {
            crate::model::design::DesignDocument::from_document(self)?;
        }

        Ok(())
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

#[cfg(test)]
mod tests {
    use super::{attachment_digest, Attachment, AttachmentBody, Document, DocumentValidationError};
    use serde_json::json;

    #[test]
    fn deserializes_wire_shape_with_base64_attachment() {
        let doc: Document = serde_json::from_value(json!({
            "_id": "note:foobar",
            "body": "hello",
            "_attachments": {
                "test.txt": { "content_type": "text/plain", "data": "aGVsbG8sIHdvcmxk" }
            }
        }))
        .unwrap();

        assert_eq!(doc.id, "note:foobar");
        assert_eq!(doc.fields.get("body"), Some(&json!("hello")));
        let attachment = &doc.attachments["test.txt"];
        assert_eq!(attachment.content_type, "text/plain");
        assert_eq!(attachment.data(), Some(b"hello, world".as_slice()));
    }

    #[test]
    fn serializes_inline_attachment_with_digest_and_base64() {
        let doc = Document::new("note:a")
            .with_attachment("a.bin", Attachment::inline("application/octet-stream", vec![1u8, 2]));
        let value = serde_json::to_value(&doc).unwrap();

        assert_eq!(value["_attachments"]["a.bin"]["data"], json!("AQI="));
        assert_eq!(
            value["_attachments"]["a.bin"]["digest"],
            json!(attachment_digest(&[1, 2]))
        );
        assert!(value.get("_rev").is_none());
        assert!(value.get("_deleted").is_none());
    }

    #[test]
    fn stub_requires_digest_and_rejects_bad_base64() {
        let stub: Attachment = serde_json::from_value(json!({
            "content_type": "text/plain", "stub": true, "digest": "sha256-x", "length": 3
        }))
        .unwrap();
        assert_eq!(
            stub.body,
            AttachmentBody::Stub {
                digest: "sha256-x".to_string(),
                length: 3
            }
        );

        let missing = serde_json::from_value::<Attachment>(json!({
            "content_type": "text/plain", "stub": true
        }));
        assert!(missing.is_err());

        let bad = serde_json::from_value::<Attachment>(json!({
            "content_type": "text/plain", "data": "%%%"
        }));
        assert!(bad.is_err());
    }

    #[test]
    fn lookup_resolves_metadata_and_nested_paths() {
        let doc = Document::new("note:x").with_field("meta", json!({ "tags": ["a", "b"] }));
        let path = |segments: &[&str]| segments.iter().map(|s| s.to_string()).collect::<Vec<_>>();

        assert_eq!(doc.lookup(&path(&["_id"])), Some(json!("note:x")));
        assert_eq!(doc.lookup(&path(&["meta", "tags", "1"])), Some(json!("b")));
        assert_eq!(doc.lookup(&path(&["meta", "missing"])), None);
        assert_eq!(doc.lookup(&path(&["_rev"])), None);
    }

    #[test]
    fn validate_rejects_reserved_names() {
        assert_eq!(
            Document::new("  ").validate(),
            Err(DocumentValidationError::EmptyId)
        );
        assert!(matches!(
            Document::new("_local/x").validate(),
            Err(DocumentValidationError::ReservedId(_))
        ));
        assert!(matches!(
            Document::new("note:x").with_field("_secret", 1).validate(),
            Err(DocumentValidationError::ReservedField(name)) if name == "_secret"
        ));
        assert!(matches!(
            Document::new("note:x")
                .with_attachment("a.txt", Attachment::inline(" ", b"x".to_vec()))
                .validate(),
            Err(DocumentValidationError::MissingContentType(_))
        ));
    }
}
