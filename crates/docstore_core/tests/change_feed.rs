use docstore_core::store::{
    AdapterRegistry, ChangesOptions, ChangesSince, DocumentStore, FeedPoll, OpenOptions,
    MEMORY_ADAPTER_ID,
};
use docstore_core::Document;
use std::time::Duration;

fn memory_store(name: &str) -> Box<dyn DocumentStore> {
    AdapterRegistry::with_builtin()
        .open(name, &OpenOptions::new(MEMORY_ADAPTER_ID))
        .unwrap()
}

#[test]
fn live_feed_sees_only_changes_after_subscribing_in_commit_order() {
    let mut store = memory_store("live");
    store.put(&Document::new("before")).unwrap();

    let feed = store.changes(&ChangesOptions::default()).unwrap();
    assert_eq!(feed.poll(), FeedPoll::Pending);

    store.put(&Document::new("a")).unwrap();
    store.put(&Document::new("b")).unwrap();

    let changes = feed
        .pending()
        .map(|event| event.unwrap())
        .collect::<Vec<_>>();
    assert_eq!(
        changes.iter().map(|c| c.id.as_str()).collect::<Vec<_>>(),
        vec!["a", "b"]
    );
    assert_eq!(changes[0].seq, 2);
    assert_eq!(changes[1].seq, 3);
    assert!(changes.iter().all(|c| c.doc.is_none()));
}

#[test]
fn include_docs_delivers_document_and_tombstones() {
    let mut store = memory_store("docs");
    let feed = store
        .changes(&ChangesOptions {
            include_docs: true,
            ..ChangesOptions::default()
        })
        .unwrap();

    let put = store
        .put(&Document::new("note:foobar").with_field("body", "hello"))
        .unwrap();
    store.remove("note:foobar", &put.rev).unwrap();

    let first = match feed.poll_timeout(Duration::from_secs(1)) {
        FeedPoll::Ready(Ok(change)) => change,
        other => panic!("unexpected poll: {other:?}"),
    };
    let doc = first.doc.unwrap();
    assert_eq!(doc.fields["body"], serde_json::json!("hello"));
    assert_eq!(doc.rev.as_deref(), Some(put.rev.as_str()));

    let second = match feed.poll() {
        FeedPoll::Ready(Ok(change)) => change,
        other => panic!("unexpected poll: {other:?}"),
    };
    assert!(second.deleted);
    assert!(second.doc.unwrap().deleted);
}

#[test]
fn since_seq_replays_latest_change_per_document() {
    let mut store = memory_store("replay");
    store.put(&Document::new("a")).unwrap();
    store.put(&Document::new("b")).unwrap();
    store.put(&Document::new("a").with_field("v", 2)).unwrap();

    let feed = store
        .changes(&ChangesOptions {
            since: ChangesSince::Seq(0),
            include_docs: false,
            live: false,
        })
        .unwrap();
    let replayed = feed
        .pending()
        .map(|event| event.unwrap())
        .map(|change| (change.id, change.seq))
        .collect::<Vec<_>>();
    assert_eq!(
        replayed,
        vec![("b".to_string(), 2), ("a".to_string(), 3)]
    );
    assert_eq!(feed.poll(), FeedPoll::Closed);
}

#[test]
fn cancelled_feeds_stop_receiving_and_close_ends_feeds() {
    let mut store = memory_store("cancel");
    let cancelled = store.changes(&ChangesOptions::default()).unwrap();
    let kept = store.changes(&ChangesOptions::default()).unwrap();
    cancelled.cancel();

    store.put(&Document::new("a")).unwrap();
    assert!(matches!(kept.poll(), FeedPoll::Ready(Ok(_))));

    store.close().unwrap();
    assert_eq!(kept.poll(), FeedPoll::Closed);
}
