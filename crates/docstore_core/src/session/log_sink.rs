//! Append-only operation log rendered by the presentation layer.
//!
//! # Invariants
//! - Entries keep insertion order; `sequence_id` strictly increases from 1.
//! - Structured values are serialized at append time, so later mutation of
//!   the source value never changes an entry.
//! - No entry is mutated or removed after append.

use log::debug;
use serde::Serialize;
use serde_json::Value;
use std::time::{SystemTime, UNIX_EPOCH};

/// One rendered log line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    pub sequence_id: u64,
    /// Wall-clock append time, epoch milliseconds.
    pub timestamp_ms: i64,
    pub message: String,
}

impl LogEntry {
    /// Stable list key for renderers.
    pub fn key(&self) -> String {
        self.sequence_id.to_string()
    }
}

/// Input accepted by [`LogSink::add_log`].
#[derive(Debug, Clone, PartialEq)]
pub enum LogMessage {
    Text(String),
    Structured(Value),
}

impl From<&str> for LogMessage {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for LogMessage {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Value> for LogMessage {
    fn from(value: Value) -> Self {
        Self::Structured(value)
    }
}

impl LogMessage {
    fn render(self) -> String {
        match self {
            Self::Text(text) => text,
            Self::Structured(value) => value.to_string(),
        }
    }
}

#[derive(Debug, Default)]
pub struct LogSink {
    entries: Vec<LogEntry>,
}

impl LogSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one message and returns its sequence id.
    pub fn add_log(&mut self, message: impl Into<LogMessage>) -> u64 {
        let message = message.into().render();
        let sequence_id = self.entries.last().map_or(1, |entry| entry.sequence_id + 1);
        debug!(
            "event=log_append module=session status=ok seq={} chars={}",
            sequence_id,
            message.chars().count()
        );
        self.entries.push(LogEntry {
            sequence_id,
            timestamp_ms: now_epoch_ms(),
            message,
        });
        sequence_id
    }

    /// Serializes `value` to JSON and appends it.
    pub fn add_structured<T: Serialize + ?Sized>(&mut self, value: &T) -> u64 {
        match serde_json::to_string(value) {
            Ok(json) => self.add_log(json),
            Err(err) => self.add_log(format!("Error: failed to serialize log value: {err}")),
        }
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    /// Messages in display order.
    pub fn messages(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|entry| entry.message.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_millis() as i64)
}

#[cfg(test)]
mod tests {
    use super::LogSink;
    use serde_json::json;

    #[test]
    fn preserves_call_order_and_assigns_increasing_ids() {
        let mut sink = LogSink::new();
        sink.add_log("first");
        sink.add_log(String::from("second"));
        sink.add_log(json!({ "k": [1, 2] }));

        assert_eq!(
            sink.messages().collect::<Vec<_>>(),
            vec!["first", "second", r#"{"k":[1,2]}"#]
        );
        let ids = sink
            .entries()
            .iter()
            .map(|entry| entry.sequence_id)
            .collect::<Vec<_>>();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(sink.entries()[2].key(), "3");
    }

    #[test]
    fn structured_values_are_snapshotted_at_append_time() {
        let mut sink = LogSink::new();
        let mut value = json!({ "count": 1 });
        sink.add_log(value.clone());
        sink.add_structured(&value);
        value["count"] = json!(2);

        assert_eq!(sink.entries()[0].message, r#"{"count":1}"#);
        assert_eq!(sink.entries()[1].message, r#"{"count":1}"#);
    }
}
