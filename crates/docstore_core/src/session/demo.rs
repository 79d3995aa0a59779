//! Demo fixtures written by `Session::populate`.

use crate::model::design::DesignDocument;
use crate::model::document::{Attachment, Document, DocumentValidationError};

pub const DEMO_STORE_NAME: &str = "mydb.db";
pub const DEMO_NOTE_ID: &str = "note:foobar";
pub const DEMO_ATTACHMENT_NAME: &str = "test.txt";
/// `hello, world`
pub const DEMO_ATTACHMENT_BASE64: &str = "aGVsbG8sIHdvcmxk";
pub const NOTES_DESIGN_NAME: &str = "notes";
pub const NOTES_VIEW: &str = "notes";
pub const NOTES_MAP_SOURCE: &str = "function (doc) {
  if (doc._id.startsWith('note:')) {
    emit(['notes', doc._id]);
  }
}";

/// The note document with its text attachment.
pub fn demo_note() -> Result<Document, DocumentValidationError> {
    let attachment = Attachment::from_base64("text/plain", DEMO_ATTACHMENT_BASE64)?;
    Ok(Document::new(DEMO_NOTE_ID)
        .with_field("body", "hello")
        .with_attachment(DEMO_ATTACHMENT_NAME, attachment))
}

/// `_design/notes` with the `notes` view over `note:` ids.
pub fn notes_design() -> DesignDocument {
    DesignDocument::new(NOTES_DESIGN_NAME).with_view(NOTES_VIEW, NOTES_MAP_SOURCE)
}

#[cfg(test)]
mod tests {
    use super::{demo_note, notes_design, DEMO_NOTE_ID};
    use crate::view::MapProgram;

    #[test]
    fn fixtures_validate_and_view_selects_the_note() {
        let note = demo_note().unwrap();
        note.validate().unwrap();
        assert_eq!(note.attachments["test.txt"].data(), Some(b"hello, world".as_slice()));

        let design = notes_design();
        let doc = design.clone().into_document();
        doc.validate().unwrap();
        assert_eq!(doc.id, "_design/notes");

        let program = MapProgram::compile(&design.views["notes"].map).unwrap();
        let rows = program.run(&note);
        assert_eq!(rows[0].0, serde_json::json!(["notes", DEMO_NOTE_ID]));
    }
}
