//! Core event bus
//!
//! The delivery core publishes state changes on a broadcast channel instead
//! of reaching into any UI state container. The embedding application
//! subscribes and re-renders from its own stores; dropped receivers and
//! missed events are acceptable because every event is derivable from the
//! persisted state.

use tokio::sync::broadcast;

use crate::message::{ContentType, MessageStatus};

/// Capacity of the broadcast channel; laggy subscribers lose oldest events
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// State changes published by the delivery core
#[derive(Debug, Clone, PartialEq)]
pub enum CoreEvent {
    /// A new outgoing message was persisted
    MessageAdded {
        /// Chat the message belongs to
        chat_id: String,
        /// The message's id
        message_id: String,
    },
    /// A message's delivery status changed
    MessageStatusChanged {
        /// Chat the message belongs to
        chat_id: String,
        /// The message's id
        message_id: String,
        /// The new status
        status: MessageStatus,
    },
    /// A connection's summary row changed
    ConnectionUpdated {
        /// The affected chat
        chat_id: String,
    },
    /// A handshake produced a brand-new connection
    NewConnection {
        /// The new chat's id
        chat_id: String,
    },
    /// The router had no sender for a content type
    UnroutableContent {
        /// Chat the send was aimed at
        chat_id: String,
        /// The content type nothing routes
        content_type: ContentType,
    },
    /// A journal drain pass finished
    JournalDrained {
        /// How many entries were delivered
        delivered: usize,
        /// How many entries were written back
        remaining: usize,
    },
}

/// Broadcast bus for [`CoreEvent`] values
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Create a new event bus
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Subscribe to future events
    pub fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    /// Publish an event; having no subscribers is not an error
    pub fn publish(&self, event: CoreEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscriber_receives_published_event() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.publish(CoreEvent::ConnectionUpdated {
            chat_id: "chat1".to_string(),
        });

        let event = rx.recv().await.expect("Failed to receive");
        assert_eq!(
            event,
            CoreEvent::ConnectionUpdated {
                chat_id: "chat1".to_string()
            }
        );
    }

    #[test]
    fn test_publish_without_subscribers_is_ok() {
        let bus = EventBus::new();
        bus.publish(CoreEvent::JournalDrained {
            delivered: 0,
            remaining: 0,
        });
    }
}
