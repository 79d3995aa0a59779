use docstore_core::model::document::attachment_digest;
use docstore_core::store::{
    AdapterRegistry, AllDocsOptions, DocumentStore, GetOptions, OpenOptions, StoreError,
    MEMORY_ADAPTER_ID,
};
use docstore_core::{Attachment, AttachmentBody, Document, DocumentValidationError};
use serde_json::json;

fn memory_store(name: &str) -> Box<dyn DocumentStore> {
    AdapterRegistry::with_builtin()
        .open(name, &OpenOptions::new(MEMORY_ADAPTER_ID))
        .unwrap()
}

fn note() -> Document {
    Document::new("note:foobar")
        .with_field("body", "hello")
        .with_attachment(
            "test.txt",
            Attachment::from_base64("text/plain", "aGVsbG8sIHdvcmxk").unwrap(),
        )
}

#[test]
fn put_assigns_increasing_revisions_and_replaces_without_rev() {
    let mut store = memory_store("revs");

    let first = store.put(&note()).unwrap();
    assert!(first.ok);
    assert_eq!(first.id, "note:foobar");
    assert!(first.rev.starts_with("1-"));

    let second = store.put(&note().with_field("body", "again")).unwrap();
    assert!(second.rev.starts_with("2-"));

    let stored = store
        .get("note:foobar", &GetOptions::default())
        .unwrap()
        .unwrap();
    assert_eq!(stored.rev.as_deref(), Some(second.rev.as_str()));
    assert_eq!(stored.fields["body"], json!("again"));
}

#[test]
fn stale_revision_is_a_conflict() {
    let mut store = memory_store("conflict");
    let first = store.put(&note()).unwrap();
    store.put(&note()).unwrap();

    let mut stale = note();
    stale.rev = Some(first.rev);
    assert!(matches!(
        store.put(&stale),
        Err(StoreError::Conflict { id }) if id == "note:foobar"
    ));

    let mut unknown = Document::new("never-stored");
    unknown.rev = Some("1-abc".to_string());
    assert!(matches!(
        store.put(&unknown),
        Err(StoreError::Conflict { .. })
    ));
}

#[test]
fn attachments_are_stubs_unless_requested() {
    let mut store = memory_store("attachments");
    store.put(&note()).unwrap();

    let stubbed = store
        .get("note:foobar", &GetOptions::default())
        .unwrap()
        .unwrap();
    let attachment = &stubbed.attachments["test.txt"];
    assert_eq!(
        attachment.body,
        AttachmentBody::Stub {
            digest: attachment_digest(b"hello, world"),
            length: 12,
        }
    );
    let wire = serde_json::to_value(&stubbed).unwrap();
    assert_eq!(wire["_attachments"]["test.txt"]["stub"], json!(true));
    assert_eq!(wire["_attachments"]["test.txt"]["length"], json!(12));

    let inline = store
        .get("note:foobar", &GetOptions { attachments: true })
        .unwrap()
        .unwrap();
    let wire = serde_json::to_value(&inline).unwrap();
    assert_eq!(
        wire["_attachments"]["test.txt"]["data"],
        json!("aGVsbG8sIHdvcmxk")
    );
    assert_eq!(
        wire["_attachments"]["test.txt"]["content_type"],
        json!("text/plain")
    );
}

#[test]
fn stub_roundtrip_keeps_attachment_and_unknown_stub_is_rejected() {
    let mut store = memory_store("stubs");
    store.put(&note()).unwrap();

    let mut fetched = store
        .get("note:foobar", &GetOptions::default())
        .unwrap()
        .unwrap();
    fetched.fields.insert("body".to_string(), json!("edited"));
    store.put(&fetched).unwrap();
    let reloaded = store
        .get("note:foobar", &GetOptions { attachments: true })
        .unwrap()
        .unwrap();
    assert_eq!(
        reloaded.attachments["test.txt"].data(),
        Some(b"hello, world".as_slice())
    );

    let forged = Document::new("other").with_attachment(
        "test.txt",
        Attachment {
            content_type: "text/plain".to_string(),
            body: AttachmentBody::Stub {
                digest: attachment_digest(b"hello, world"),
                length: 12,
            },
        },
    );
    assert!(matches!(
        store.put(&forged),
        Err(StoreError::Validation(DocumentValidationError::UnknownAttachmentStub(name)))
            if name == "test.txt"
    ));
}

#[test]
fn invalid_documents_are_rejected_before_writing() {
    let mut store = memory_store("invalid");

    assert!(matches!(
        store.put(&Document::new("")),
        Err(StoreError::Validation(DocumentValidationError::EmptyId))
    ));
    assert!(matches!(
        store.put(&Document::new("a").with_field("_secret", 1)),
        Err(StoreError::Validation(_))
    ));
    assert!(matches!(
        store.put(&Document::new("_design/broken").with_field("views", json!({ "v": {} }))),
        Err(StoreError::Validation(_))
    ));
    assert_eq!(store.info().unwrap().doc_count, 0);
}

#[test]
fn remove_tombstones_document_and_hides_it() {
    let mut store = memory_store("remove");
    let put = store.put(&note()).unwrap();
    store.put(&Document::new("b")).unwrap();

    let removed = store.remove("note:foobar", &put.rev).unwrap();
    assert!(removed.rev.starts_with("2-"));
    assert!(store
        .get("note:foobar", &GetOptions::default())
        .unwrap()
        .is_none());
    assert!(matches!(
        store.remove("note:foobar", &removed.rev),
        Err(StoreError::NotFound(_))
    ));

    let listed = store.all_docs(&AllDocsOptions::default()).unwrap();
    assert_eq!(listed.total_rows, 1);
    assert_eq!(listed.rows[0].id, "b");

    let revived = store.put(&note()).unwrap();
    assert!(revived.rev.starts_with("3-"));
}

#[test]
fn all_docs_lists_by_id_with_optional_docs() {
    let mut store = memory_store("listing");
    store.put(&Document::new("b")).unwrap();
    store.put(&Document::new("a").with_field("n", 1)).unwrap();

    let listed = store
        .all_docs(&AllDocsOptions {
            include_docs: true,
            attachments: false,
        })
        .unwrap();
    let ids = listed
        .rows
        .iter()
        .map(|row| row.id.as_str())
        .collect::<Vec<_>>();
    assert_eq!(ids, vec!["a", "b"]);
    assert_eq!(listed.rows[0].key, json!("a"));
    assert_eq!(
        listed.rows[0].doc.as_ref().unwrap().fields["n"],
        json!(1)
    );
    assert!(listed.rows[0].value["rev"].as_str().unwrap().starts_with("1-"));
}

#[test]
fn sqlite_store_persists_across_handles_and_leases_its_file() {
    let dir = tempfile::tempdir().unwrap();
    let registry = AdapterRegistry::with_builtin();
    let options = OpenOptions::default().with_location(dir.path());

    let mut store = registry.open("mydb.db", &options).unwrap();
    store.put(&note()).unwrap();
    assert!(matches!(
        registry.open("mydb.db", &options),
        Err(StoreError::NameInUse(_))
    ));
    store.close().unwrap();

    let store = registry.open("mydb.db", &options).unwrap();
    let info = store.info().unwrap();
    assert_eq!(info.db_name, "mydb.db");
    assert_eq!(info.adapter, "sqlite");
    assert_eq!(info.doc_count, 1);
    assert_eq!(info.update_seq, 1);
}

#[test]
fn destroy_deletes_files_and_content() {
    let dir = tempfile::tempdir().unwrap();
    let registry = AdapterRegistry::with_builtin();
    let options = OpenOptions::default().with_location(dir.path());

    let mut store = registry.open("gone.db", &options).unwrap();
    store.put(&note()).unwrap();
    store.destroy().unwrap();
    assert!(!dir.path().join("gone.db").exists());

    let store = registry.open("gone.db", &options).unwrap();
    let info = store.info().unwrap();
    assert_eq!(info.doc_count, 0);
    assert_eq!(info.update_seq, 0);
}

#[test]
fn unknown_adapter_and_bad_names_are_rejected() {
    let registry = AdapterRegistry::with_builtin();
    assert_eq!(registry.adapter_ids(), vec!["memory", "sqlite"]);

    assert!(matches!(
        registry.open("mydb.db", &OpenOptions::new("react-native-sqlite")),
        Err(StoreError::UnsupportedAdapter(id)) if id == "react-native-sqlite"
    ));
    assert!(matches!(
        registry.open("../escape", &OpenOptions::new(MEMORY_ADAPTER_ID)),
        Err(StoreError::InvalidName(_))
    ));
}
