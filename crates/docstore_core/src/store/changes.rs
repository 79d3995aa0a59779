//! Change notification fan-out and live feeds.
//!
//! # Design
//! - Feeds are notified after the write is committed.
//! - A feed only sees changes committed after it attached, unless the store
//!   replayed history into it first.
//! - Dropping or cancelling a feed detaches it on the next fan-out.

use crate::model::document::Document;
use crate::store::StoreError;
use serde::Serialize;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::time::Duration;

/// One committed document change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeNotification {
    pub seq: u64,
    pub id: String,
    pub rev: String,
    pub deleted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc: Option<Document>,
}

/// Error delivered on a change feed instead of a notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamError {
    pub message: String,
}

impl StreamError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl Display for StreamError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "change feed error: {}", self.message)
    }
}

impl Error for StreamError {}

impl From<StoreError> for StreamError {
    fn from(value: StoreError) -> Self {
        Self::new(value.to_string())
    }
}

/// Item type of a change feed.
pub type ChangeEvent = Result<ChangeNotification, StreamError>;

/// Non-blocking poll result.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedPoll {
    Ready(ChangeEvent),
    Pending,
    /// The store released the feed; no further events will arrive.
    Closed,
}

/// Receiving end of a change subscription.
#[derive(Debug)]
pub struct ChangeFeed {
    receiver: Receiver<ChangeEvent>,
}

impl ChangeFeed {
    /// Creates a feed and the sender a backend pushes its events into.
    ///
    /// Dropping every sender closes the feed.
    pub fn channel() -> (Sender<ChangeEvent>, Self) {
        let (sender, receiver) = mpsc::channel();
        (sender, Self { receiver })
    }

    /// Returns the next event without blocking.
    pub fn poll(&self) -> FeedPoll {
        match self.receiver.try_recv() {
            Ok(event) => FeedPoll::Ready(event),
            Err(TryRecvError::Empty) => FeedPoll::Pending,
            Err(TryRecvError::Disconnected) => FeedPoll::Closed,
        }
    }

    /// Waits up to `timeout` for the next event.
    pub fn poll_timeout(&self, timeout: Duration) -> FeedPoll {
        match self.receiver.recv_timeout(timeout) {
            Ok(event) => FeedPoll::Ready(event),
            Err(mpsc::RecvTimeoutError::Timeout) => FeedPoll::Pending,
            Err(mpsc::RecvTimeoutError::Disconnected) => FeedPoll::Closed,
        }
    }

    /// Iterates over the events that are already queued.
    pub fn pending(&self) -> impl Iterator<Item = ChangeEvent> + '_ {
        self.receiver.try_iter()
    }

    /// Detaches from the store; queued events are discarded.
    pub fn cancel(self) {}
}

struct Subscriber {
    sender: Sender<ChangeEvent>,
    include_docs: bool,
}

/// Per-store registry of live feeds.
#[derive(Default)]
pub(crate) struct ChangeHub {
    subscribers: Vec<Subscriber>,
}

impl ChangeHub {
    pub(crate) fn attach(&mut self, sender: Sender<ChangeEvent>, include_docs: bool) {
        self.subscribers.push(Subscriber {
            sender,
            include_docs,
        });
    }

    /// Delivers one committed change to every live feed.
    ///
    /// `load_doc` runs at most once, and only when some feed wants documents.
    /// Feeds whose receiver was dropped are removed.
    pub(crate) fn notify(
        &mut self,
        change: &ChangeNotification,
        load_doc: impl FnOnce() -> Result<Option<Document>, StoreError>,
    ) {
        if self.subscribers.is_empty() {
            return;
        }

        let loaded = if self.subscribers.iter().any(|s| s.include_docs) {
            Some(load_doc().map_err(StreamError::from))
        } else {
            None
        };

        self.subscribers.retain(|subscriber| {
            let event = match (&loaded, subscriber.include_docs) {
                (Some(Ok(doc)), true) => Ok(ChangeNotification {
                    doc: doc.clone(),
                    ..change.clone()
                }),
                (Some(Err(err)), true) => Err(err.clone()),
                _ => Ok(change.clone()),
            };
            subscriber.sender.send(event).is_ok()
        });
    }

    pub(crate) fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Drops every sender; attached feeds observe `FeedPoll::Closed`.
    pub(crate) fn close(&mut self) {
        self.subscribers.clear();
    }
}
