//! Session state machine over one store handle.

use crate::model::document::Document;
use crate::session::demo::{self, DEMO_NOTE_ID, DEMO_STORE_NAME, NOTES_VIEW};
use crate::session::error::{SessionError, SessionResult};
use crate::session::log_sink::{LogMessage, LogSink};
use crate::store::{
    AdapterRegistry, ChangeEvent, ChangeFeed, ChangesOptions, ChangesSince, DocumentStore,
    FeedPoll, OpenOptions, PutResponse, QueryOptions, QueryResponse, StoreError, StoreInfo,
};
use log::{info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Store name and open options a session targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub name: String,
    pub options: OpenOptions,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            name: DEMO_STORE_NAME.to_string(),
            options: OpenOptions::default(),
        }
    }
}

impl SessionConfig {
    pub fn new(name: impl Into<String>, options: OpenOptions) -> Self {
        Self {
            name: name.into(),
            options,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Closed,
    Open,
}

impl Display for SessionState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Unsubscribed,
    Subscribed,
}

/// Caller-side token for the live change subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    id: u64,
}

impl SubscriptionHandle {
    pub fn id(&self) -> u64 {
        self.id
    }
}

/// Stage of `populate` that a degraded run stopped at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopulateStep {
    NotOpen,
    PutDocument,
    PutView,
    QueryView,
}

impl Display for PopulateStep {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::NotOpen => "not_open",
            Self::PutDocument => "put_document",
            Self::PutView => "put_view",
            Self::QueryView => "query_view",
        };
        f.write_str(label)
    }
}

/// Result of a populate run. Failures are values, never errors.
#[derive(Debug, Clone, PartialEq)]
pub enum PopulateOutcome {
    Completed { query: QueryResponse },
    Degraded { step: PopulateStep, reason: String },
}

impl PopulateOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

struct Subscription {
    handle: SubscriptionHandle,
    feed: ChangeFeed,
}

/// Owns at most one document store handle and the operation log.
pub struct Session {
    registry: AdapterRegistry,
    target: SessionConfig,
    store: Option<Box<dyn DocumentStore>>,
    subscription: Option<Subscription>,
    next_subscription_id: u64,
    log: LogSink,
}

impl Session {
    /// Creates a closed session over the built-in adapters.
    pub fn new(config: SessionConfig) -> Self {
        Self::with_registry(config, AdapterRegistry::with_builtin())
    }

    pub fn with_registry(config: SessionConfig, registry: AdapterRegistry) -> Self {
        Self {
            registry,
            target: config,
            store: None,
            subscription: None,
            next_subscription_id: 1,
            log: LogSink::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        if self.store.is_some() {
            SessionState::Open
        } else {
            SessionState::Closed
        }
    }

    pub fn subscription_state(&self) -> SubscriptionState {
        if self.subscription.is_some() {
            SubscriptionState::Subscribed
        } else {
            SubscriptionState::Unsubscribed
        }
    }

    /// Target used by `reset`; updated by every successful `open`.
    pub fn target(&self) -> &SessionConfig {
        &self.target
    }

    pub fn log(&self) -> &LogSink {
        &self.log
    }

    pub fn add_log(&mut self, message: impl Into<LogMessage>) -> u64 {
        self.log.add_log(message)
    }

    /// Borrow of the open handle for direct store calls.
    pub fn store(&self) -> Option<&dyn DocumentStore> {
        self.store.as_deref()
    }

    /// Acquires a handle to `name` through the adapter named in `options`.
    ///
    /// # Errors
    /// - `InvalidState` when a handle is already open.
    /// - `StoreUnavailable` when the adapter cannot provide the handle.
    pub fn open(&mut self, name: &str, options: &OpenOptions) -> SessionResult<()> {
        if self.store.is_some() {
            return Err(SessionError::InvalidState {
                operation: "open",
                state: SessionState::Open,
            });
        }

        info!(
            "event=session_open module=session status=start adapter={}",
            options.adapter
        );
        match self.registry.open(name, options) {
            Ok(store) => {
                self.store = Some(store);
                self.target = SessionConfig::new(name, options.clone());
                self.log.add_log("Database OPEN");
                info!(
                    "event=session_open module=session status=ok adapter={}",
                    options.adapter
                );
                Ok(())
            }
            Err(source) => {
                warn!(
                    "event=session_open module=session status=error adapter={} error={}",
                    options.adapter, source
                );
                Err(SessionError::StoreUnavailable {
                    name: name.to_string(),
                    source,
                })
            }
        }
    }

    /// Open (when closed), destroy, then open the remembered target again.
    pub fn reset(&mut self) -> SessionResult<()> {
        info!("event=session_reset module=session status=start");
        if self.store.is_none() {
            let target = self.target.clone();
            self.open(&target.name, &target.options)?;
        }
        self.destroy()?;
        let target = self.target.clone();
        self.open(&target.name, &target.options)?;
        info!("event=session_reset module=session status=ok");
        Ok(())
    }

    /// Deletes all persisted content of the open handle and releases it.
    ///
    /// # Errors
    /// - `InvalidState` when no handle is open.
    /// - `DestroyFailed` when the store rejects deletion; the session stays
    ///   open and keeps its subscription.
    pub fn destroy(&mut self) -> SessionResult<()> {
        let Some(store) = self.store.take() else {
            return Err(SessionError::InvalidState {
                operation: "destroy",
                state: SessionState::Closed,
            });
        };

        self.log.add_log("Destroying db..");
        let name = store.name().to_string();
        info!("event=session_destroy module=session status=start");
        match store.destroy() {
            Ok(()) => {
                self.cancel_subscription();
                self.log.add_log("Destroying db completed, Database CLOSED");
                info!("event=session_destroy module=session status=ok");
                Ok(())
            }
            Err(rejected) => {
                let (store, source) = rejected.into_parts();
                self.store = Some(store);
                warn!(
                    "event=session_destroy module=session status=error error={}",
                    source
                );
                Err(SessionError::DestroyFailed { name, source })
            }
        }
    }

    /// Releases the open handle and keeps its persisted content.
    ///
    /// The session is closed afterwards even when the store reports an error.
    pub fn close(&mut self) -> SessionResult<()> {
        let Some(store) = self.store.take() else {
            return Err(SessionError::InvalidState {
                operation: "close",
                state: SessionState::Closed,
            });
        };

        self.cancel_subscription();
        let name = store.name().to_string();
        match store.close() {
            Ok(()) => {
                self.log.add_log("Database CLOSED");
                info!("event=session_close module=session status=ok");
                Ok(())
            }
            Err(source) => {
                warn!(
                    "event=session_close module=session status=error error={}",
                    source
                );
                Err(SessionError::CloseFailed { name, source })
            }
        }
    }

    pub fn info(&self) -> SessionResult<StoreInfo> {
        let store = self.open_store("info")?;
        store.info().map_err(|source| SessionError::QueryFailed {
            target: "info".to_string(),
            source,
        })
    }

    /// Writes the demo note and notes view, then queries the view.
    ///
    /// Never returns an error: a failing step is recorded through the error
    /// sink and reported as `PopulateOutcome::Degraded`.
    pub fn populate(&mut self) -> PopulateOutcome {
        info!("event=session_populate module=session status=start");
        match self.try_populate() {
            Ok(query) => {
                self.log.add_log("Done!");
                info!(
                    "event=session_populate module=session status=ok rows={}",
                    query.rows.len()
                );
                PopulateOutcome::Completed { query }
            }
            Err((step, err)) => {
                self.report_error(&err);
                warn!(
                    "event=session_populate module=session status=error step={}",
                    step
                );
                PopulateOutcome::Degraded {
                    step,
                    reason: err.to_string(),
                }
            }
        }
    }

    fn try_populate(&mut self) -> Result<QueryResponse, (PopulateStep, SessionError)> {
        if self.store.is_none() {
            return Err((
                PopulateStep::NotOpen,
                SessionError::InvalidState {
                    operation: "populate",
                    state: SessionState::Closed,
                },
            ));
        }

        let note = demo::demo_note().map_err(|err| {
            (
                PopulateStep::PutDocument,
                SessionError::WriteFailed {
                    id: DEMO_NOTE_ID.to_string(),
                    source: StoreError::from(err),
                },
            )
        })?;
        self.put_and_pump(&note)
            .map_err(|err| (PopulateStep::PutDocument, err))?;

        let view = demo::notes_design().into_document();
        self.put_and_pump(&view)
            .map_err(|err| (PopulateStep::PutView, err))?;

        let options = QueryOptions {
            include_docs: true,
            attachments: true,
            ..QueryOptions::default()
        };
        let query_failed = |source: StoreError| {
            (
                PopulateStep::QueryView,
                SessionError::QueryFailed {
                    target: NOTES_VIEW.to_string(),
                    source,
                },
            )
        };
        let query = self
            .open_store("populate")
            .map_err(|err| (PopulateStep::QueryView, err))?
            .query(NOTES_VIEW, &options)
            .map_err(query_failed)?;
        let json = serde_json::to_string(&query).map_err(|err| query_failed(err.into()))?;
        self.log.add_log(format!("Query result: {json}"));
        Ok(query)
    }

    fn put_and_pump(&mut self, doc: &Document) -> SessionResult<PutResponse> {
        let store = self.store.as_mut().ok_or(SessionError::InvalidState {
            operation: "populate",
            state: SessionState::Closed,
        })?;
        let response = store.put(doc).map_err(|source| SessionError::WriteFailed {
            id: doc.id.clone(),
            source,
        })?;
        self.log.add_log(format!("Saved {}", response.id));
        self.pump_changes();
        Ok(response)
    }

    /// Registers a live change feed starting now, with documents included.
    ///
    /// Subscribing again while subscribed returns the existing handle.
    pub fn subscribe(&mut self) -> SessionResult<SubscriptionHandle> {
        let Some(store) = self.store.as_mut() else {
            return Err(SessionError::InvalidState {
                operation: "subscribe",
                state: SessionState::Closed,
            });
        };
        if let Some(subscription) = &self.subscription {
            return Ok(subscription.handle);
        }

        let options = ChangesOptions {
            since: ChangesSince::Now,
            include_docs: true,
            live: true,
        };
        let feed = store.changes(&options).map_err(|err| {
            warn!(
                "event=session_subscribe module=session status=error error={}",
                err
            );
            SessionError::StreamError(err.into())
        })?;
        let handle = SubscriptionHandle {
            id: self.next_subscription_id,
        };
        self.next_subscription_id += 1;
        self.subscription = Some(Subscription { handle, feed });
        info!(
            "event=session_subscribe module=session status=ok subscription_id={}",
            handle.id
        );
        Ok(handle)
    }

    /// Cancels the live feed. Returns `false` when there was none.
    pub fn cancel_subscription(&mut self) -> bool {
        match self.subscription.take() {
            Some(subscription) => {
                let id = subscription.handle.id;
                subscription.feed.cancel();
                info!(
                    "event=session_unsubscribe module=session status=ok subscription_id={}",
                    id
                );
                true
            }
            None => false,
        }
    }

    /// Drains queued change events into the log and returns how many.
    ///
    /// A feed closed by its store ends the subscription.
    pub fn pump_changes(&mut self) -> usize {
        let Some(subscription) = &self.subscription else {
            return 0;
        };

        let mut drained: Vec<ChangeEvent> = Vec::new();
        let mut closed = false;
        loop {
            match subscription.feed.poll() {
                FeedPoll::Ready(event) => drained.push(event),
                FeedPoll::Pending => break,
                FeedPoll::Closed => {
                    closed = true;
                    break;
                }
            }
        }

        let count = drained.len();
        for event in drained {
            match event {
                Ok(change) => {
                    self.log.add_log(format!("db changed: {}", change.id));
                }
                Err(err) => {
                    self.report_error(&SessionError::StreamError(err));
                }
            }
        }
        if closed {
            self.subscription = None;
            info!("event=session_feed_closed module=session status=ok");
        }
        count
    }

    /// Records a failure as `Error: <message>`.
    ///
    /// Always returns `false`: the failure is recorded, never recovered.
    pub fn report_error(&mut self, err: &dyn Error) -> bool {
        let display = err.to_string();
        let message = if display.trim().is_empty() {
            format!("{err:?}")
        } else {
            display
        };
        warn!(
            "event=session_error module=session status=error chars={}",
            message.chars().count()
        );
        self.log.add_log(format!("Error: {message}"));
        false
    }

    /// Full demo sequence: reset, subscribe, populate.
    ///
    /// # Errors
    /// Reset and subscribe failures are recorded and returned. Populate
    /// failures are returned inside the outcome.
    pub fn run_demo(&mut self) -> SessionResult<PopulateOutcome> {
        self.log.add_log("Starting docstore demo");
        self.log.add_log("Initialize db");
        let prepared = self.reset().and_then(|()| self.subscribe());
        if let Err(err) = prepared {
            self.report_error(&err);
            return Err(err);
        }
        Ok(self.populate())
    }

    fn open_store(&self, operation: &'static str) -> SessionResult<&dyn DocumentStore> {
        self.store.as_deref().ok_or(SessionError::InvalidState {
            operation,
            state: SessionState::Closed,
        })
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.cancel_subscription();
        if let Some(store) = self.store.take() {
            if let Err(err) = store.close() {
                warn!(
                    "event=session_drop module=session status=error error={}",
                    err
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Session, SessionConfig, SessionState, SubscriptionState};
    use crate::session::SessionError;
    use crate::store::{OpenOptions, MEMORY_ADAPTER_ID};
    use std::fmt::{Display, Formatter};

    fn memory_session(name: &str) -> Session {
        Session::new(SessionConfig::new(name, OpenOptions::new(MEMORY_ADAPTER_ID)))
    }

    #[derive(Debug)]
    struct Silent;

    impl Display for Silent {
        fn fmt(&self, _f: &mut Formatter<'_>) -> std::fmt::Result {
            Ok(())
        }
    }

    impl std::error::Error for Silent {}

    #[test]
    fn open_twice_is_invalid_state() {
        let mut session = memory_session("twice");
        let options = OpenOptions::new(MEMORY_ADAPTER_ID);
        session.open("twice", &options).unwrap();

        let err = session.open("twice", &options).unwrap_err();
        assert!(matches!(
            err,
            SessionError::InvalidState {
                operation: "open",
                state: SessionState::Open
            }
        ));
        assert_eq!(session.state(), SessionState::Open);
    }

    #[test]
    fn subscribe_while_subscribed_returns_same_handle() {
        let mut session = memory_session("resub");
        session.reset().unwrap();

        let first = session.subscribe().unwrap();
        let second = session.subscribe().unwrap();
        assert_eq!(first, second);
        assert_eq!(session.subscription_state(), SubscriptionState::Subscribed);

        assert!(session.cancel_subscription());
        assert!(!session.cancel_subscription());
        assert_ne!(session.subscribe().unwrap(), first);
    }

    #[test]
    fn error_sink_falls_back_to_debug_for_empty_display() {
        let mut session = memory_session("sink");
        assert!(!session.report_error(&Silent));
        assert_eq!(session.log().entries()[0].message, "Error: Silent");
    }

    #[test]
    fn close_keeps_content_for_next_open() {
        let dir = tempfile::tempdir().unwrap();
        let options = OpenOptions::default().with_location(dir.path());
        let mut session = Session::new(SessionConfig::new("keep.db", options.clone()));
        session.reset().unwrap();
        assert!(session.populate().is_completed());
        session.close().unwrap();
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(session.log().messages().last(), Some("Database CLOSED"));

        session.open("keep.db", &options).unwrap();
        assert_eq!(session.info().unwrap().doc_count, 2);
    }
}
