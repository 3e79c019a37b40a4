//! Event bus for watch and update lifecycle events.
//!
//! Provides a publish/subscribe mechanism for watcher start/stop,
//! per-container reports, batch reports, and update outcomes.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::broadcast;
use tracing::debug;

/// Maximum number of events buffered in the broadcast channel.
const EVENT_BUFFER_SIZE: usize = 256;

/// Event types for filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    // Watcher events
    WatcherStarted,
    WatcherStopped,

    // Report events
    ContainerReport,
    BatchReport,

    // Update events
    UpdateApplied,
    UpdateFailed,
    UpdateRolledBack,
}

impl EventType {
    /// Get the event type string (e.g., "update.applied").
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::WatcherStarted => "watcher.started",
            EventType::WatcherStopped => "watcher.stopped",
            EventType::ContainerReport => "report.container",
            EventType::BatchReport => "report.batch",
            EventType::UpdateApplied => "update.applied",
            EventType::UpdateFailed => "update.failed",
            EventType::UpdateRolledBack => "update.rolled_back",
        }
    }

    /// Get the resource type (e.g., "watcher", "update").
    pub fn resource_type(&self) -> &'static str {
        match self {
            EventType::WatcherStarted | EventType::WatcherStopped => "watcher",
            EventType::ContainerReport | EventType::BatchReport => "report",
            EventType::UpdateApplied | EventType::UpdateFailed | EventType::UpdateRolledBack => {
                "update"
            }
        }
    }

    /// Get the action (e.g., "applied", "failed").
    pub fn action(&self) -> &'static str {
        match self {
            EventType::WatcherStarted => "started",
            EventType::WatcherStopped => "stopped",
            EventType::ContainerReport => "container",
            EventType::BatchReport => "batch",
            EventType::UpdateApplied => "applied",
            EventType::UpdateFailed => "failed",
            EventType::UpdateRolledBack => "rolled_back",
        }
    }
}

/// A system event.
#[derive(Debug, Clone)]
pub struct Event {
    /// Unix timestamp in milliseconds
    pub timestamp: i64,
    /// Event type string (e.g., "update.applied")
    pub event_type: String,
    /// Resource type (e.g., "watcher", "update")
    pub resource_type: String,
    /// Resource ID (container id or watcher id)
    pub resource_id: String,
    /// Action (e.g., "applied", "failed")
    pub action: String,
    /// Human-readable message
    pub message: String,
    /// Additional metadata
    pub metadata: HashMap<String, String>,
}

impl Event {
    /// Create a new event.
    pub fn new(event_type: EventType, resource_id: &str, message: &str) -> Self {
        Self {
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as i64,
            event_type: event_type.as_str().to_string(),
            resource_type: event_type.resource_type().to_string(),
            resource_id: resource_id.to_string(),
            action: event_type.action().to_string(),
            message: message.to_string(),
            metadata: HashMap::new(),
        }
    }

    /// Add metadata to the event.
    pub fn with_metadata(mut self, key: &str, value: &str) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }
}

/// Event bus for publishing and subscribing to system events.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a new event bus.
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_BUFFER_SIZE);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: Event) {
        debug!(event_type = %event.event_type, resource_id = %event.resource_id, "Publishing event");
        // Ignore send errors (no subscribers)
        let _ = self.sender.send(event);
    }

    /// Subscribe to events, optionally filtered by event type patterns.
    ///
    /// # Filter patterns
    ///
    /// - `"update.*"` - All update events
    /// - `"watcher.*"` - All watcher events
    /// - `"update.applied"` - Only applied-update events
    /// - Empty list - All events
    pub fn subscribe(&self, filters: Vec<String>) -> EventSubscriber {
        EventSubscriber { receiver: self.sender.subscribe(), filters }
    }

    /// Get the number of current subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Event subscriber with optional filtering.
pub struct EventSubscriber {
    receiver: broadcast::Receiver<Event>,
    filters: Vec<String>,
}

impl EventSubscriber {
    /// Receive the next event (blocking).
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if self.matches(&event) {
                        return Some(event);
                    }
                    // Event doesn't match filters, continue
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!("Event subscriber lagged by {} events", n);
                    // Continue receiving
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return None;
                }
            }
        }
    }

    /// Check if an event matches the filters.
    fn matches(&self, event: &Event) -> bool {
        // Empty filters = all events
        if self.filters.is_empty() {
            return true;
        }

        for filter in &self.filters {
            // Exact match
            if filter == &event.event_type {
                return true;
            }

            // Wildcard match (e.g., "update.*")
            if filter.ends_with(".*") {
                let prefix = &filter[..filter.len() - 2];
                if event.event_type.starts_with(prefix) {
                    return true;
                }
            }
        }

        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_subscribe() {
        let bus = EventBus::new();

        let mut subscriber = bus.subscribe(vec![]);

        bus.publish(Event::new(EventType::UpdateApplied, "abc123", "Update applied"));

        let event = tokio::time::timeout(std::time::Duration::from_millis(100), subscriber.recv())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(event.event_type, "update.applied");
        assert_eq!(event.resource_id, "abc123");
    }

    #[tokio::test]
    async fn test_filter_match() {
        let bus = EventBus::new();

        let mut subscriber = bus.subscribe(vec!["update.*".to_string()]);

        // Should NOT receive report event
        bus.publish(Event::new(EventType::ContainerReport, "abc123", "Report"));

        // Should receive update event
        bus.publish(Event::new(EventType::UpdateFailed, "abc123", "Update failed"));

        let event = tokio::time::timeout(std::time::Duration::from_millis(100), subscriber.recv())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(event.event_type, "update.failed");
    }

    #[test]
    fn test_event_type_strings() {
        assert_eq!(EventType::UpdateApplied.as_str(), "update.applied");
        assert_eq!(EventType::UpdateApplied.resource_type(), "update");
        assert_eq!(EventType::UpdateApplied.action(), "applied");
    }
}
