//! Observability events.
//!
//! The engine emits a structured event for every plugin execution and every
//! resource operation. Storage and transport are the sink implementor's
//! problem; the engine only guarantees the payload shape.

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info};

use crate::stages::Stage;

/// The payload emitted for each plugin execution.
#[derive(Debug, Clone, Serialize)]
pub struct PluginEvent {
    /// The stage the plugin executed in.
    pub stage: Stage,
    /// The plugin name.
    pub plugin: String,
    /// Wall-clock execution time in milliseconds.
    pub duration_ms: f64,
    /// Whether the plugin completed without raising.
    pub success: bool,
    /// A short error tag, present only on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
}

impl PluginEvent {
    /// Builds a success payload.
    #[must_use]
    pub fn success(stage: Stage, plugin: impl Into<String>, duration_ms: f64) -> Self {
        Self {
            stage,
            plugin: plugin.into(),
            duration_ms,
            success: true,
            error_type: None,
        }
    }

    /// Builds a failure payload.
    #[must_use]
    pub fn failure(
        stage: Stage,
        plugin: impl Into<String>,
        duration_ms: f64,
        error_type: impl Into<String>,
    ) -> Self {
        Self {
            stage,
            plugin: plugin.into(),
            duration_ms,
            success: false,
            error_type: Some(error_type.into()),
        }
    }

    /// Serializes the payload for sink emission.
    #[must_use]
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_else(|_| serde_json::json!({}))
    }
}

/// Receiver for engine events.
///
/// `try_emit` must never raise; a sink that cannot accept an event drops it.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Emits an event, awaiting delivery.
    async fn emit(&self, event_type: &str, data: Option<serde_json::Value>);

    /// Emits an event without blocking the pipeline.
    fn try_emit(&self, event_type: &str, data: Option<serde_json::Value>);
}

/// A sink that discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

#[async_trait]
impl EventSink for NoOpEventSink {
    async fn emit(&self, _event_type: &str, _data: Option<serde_json::Value>) {}

    fn try_emit(&self, _event_type: &str, _data: Option<serde_json::Value>) {}
}

/// A sink that forwards events to the tracing subscriber.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingEventSink {
    /// Log failures and refusals at debug level too.
    verbose: bool,
}

impl LoggingEventSink {
    /// Creates a sink logging at info level.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a sink that also logs at debug level.
    #[must_use]
    pub fn verbose() -> Self {
        Self { verbose: true }
    }

    fn log(&self, event_type: &str, data: &Option<serde_json::Value>) {
        if self.verbose {
            debug!(event_type = %event_type, data = ?data, "engine event");
        } else {
            info!(event_type = %event_type, data = ?data, "engine event");
        }
    }
}

#[async_trait]
impl EventSink for LoggingEventSink {
    async fn emit(&self, event_type: &str, data: Option<serde_json::Value>) {
        self.log(event_type, &data);
    }

    fn try_emit(&self, event_type: &str, data: Option<serde_json::Value>) {
        self.log(event_type, &data);
    }
}

/// A sink that records events for test assertions.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: parking_lot::RwLock<Vec<(String, Option<serde_json::Value>)>>,
}

impl CollectingEventSink {
    /// Creates an empty collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all recorded events in emission order.
    #[must_use]
    pub fn events(&self) -> Vec<(String, Option<serde_json::Value>)> {
        self.events.read().clone()
    }

    /// Returns events whose type starts with the prefix.
    #[must_use]
    pub fn events_of_type(&self, prefix: &str) -> Vec<(String, Option<serde_json::Value>)> {
        self.events
            .read()
            .iter()
            .filter(|(t, _)| t.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Returns the number of recorded events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Drops all recorded events.
    pub fn clear(&self) {
        self.events.write().clear();
    }
}

#[async_trait]
impl EventSink for CollectingEventSink {
    async fn emit(&self, event_type: &str, data: Option<serde_json::Value>) {
        self.events.write().push((event_type.to_string(), data));
    }

    fn try_emit(&self, event_type: &str, data: Option<serde_json::Value>) {
        self.events.write().push((event_type.to_string(), data));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plugin_event_payload_shape() {
        let event = PluginEvent::success(Stage::Do, "fetcher", 12.5);
        let value = event.to_value();
        assert_eq!(value["stage"], "DO");
        assert_eq!(value["plugin"], "fetcher");
        assert_eq!(value["success"], true);
        assert!(value.get("error_type").is_none());

        let event = PluginEvent::failure(Stage::Think, "planner", 3.0, "plugin_execution");
        let value = event.to_value();
        assert_eq!(value["success"], false);
        assert_eq!(value["error_type"], "plugin_execution");
    }

    #[tokio::test]
    async fn test_collecting_sink_records_in_order() {
        let sink = CollectingEventSink::new();
        assert!(sink.is_empty());

        sink.emit("plugin.started", None).await;
        sink.try_emit("plugin.completed", Some(serde_json::json!({"ok": true})));

        assert_eq!(sink.len(), 2);
        let events = sink.events();
        assert_eq!(events[0].0, "plugin.started");
        assert_eq!(events[1].0, "plugin.completed");
    }

    #[tokio::test]
    async fn test_collecting_sink_prefix_filter() {
        let sink = CollectingEventSink::new();
        sink.emit("plugin.started", None).await;
        sink.emit("plugin.failed", None).await;
        sink.emit("resource.initialized", None).await;

        assert_eq!(sink.events_of_type("plugin.").len(), 2);
        assert_eq!(sink.events_of_type("resource.").len(), 1);

        sink.clear();
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_noop_and_logging_sinks_do_not_panic() {
        NoOpEventSink.emit("anything", None).await;
        NoOpEventSink.try_emit("anything", Some(serde_json::json!(1)));

        let sink = LoggingEventSink::verbose();
        sink.emit("plugin.completed", Some(serde_json::json!({"x": 1}))).await;
        sink.try_emit("plugin.failed", None);
    }
}
