use super::DocumentEvent;
use async_stream::stream;
use futures_core::Stream;
use std::sync::{PoisonError, RwLock};
use time::OffsetDateTime;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;

/// Name of the shared topic every document event is published on.
pub const DOCUMENT_EVENT_TOPIC: &str = "document:events";

/// Errors surfaced by the event bus.
#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    /// Event could not be encoded for the transport.
    #[error("Failed to serialize document event: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Transport has been shut down.
    #[error("Event bus is closed")]
    Closed,
}

/// Broadcast bus for [`DocumentEvent`]s.
///
/// Every subscriber owns an independent receive buffer of `capacity` events. A subscriber that
/// falls behind loses the oldest events from its own buffer without slowing the publisher or
/// other subscribers.
pub struct EventBus {
    sender: RwLock<Option<broadcast::Sender<String>>>,
}

impl EventBus {
    /// Create a bus whose subscribers buffer up to `capacity` events.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: RwLock::new(Some(sender)),
        }
    }

    /// Stamp, serialize, and broadcast an event to every current subscriber.
    ///
    /// Returns the number of subscribers the event was handed to. Having no subscribers is not
    /// an error.
    pub fn publish(&self, mut event: DocumentEvent) -> Result<usize, EventBusError> {
        event.timestamp = OffsetDateTime::now_utc();
        let payload = serde_json::to_string(&event).inspect_err(|error| {
            tracing::error!(error = %error, doc_id = %event.doc_id, "Failed to serialize document event");
        })?;

        let guard = self.sender.read().unwrap_or_else(PoisonError::into_inner);
        let Some(sender) = guard.as_ref() else {
            tracing::error!(
                topic = DOCUMENT_EVENT_TOPIC,
                doc_id = %event.doc_id,
                "Failed to publish document event: bus closed"
            );
            return Err(EventBusError::Closed);
        };

        let delivered = sender.send(payload).unwrap_or(0);
        tracing::info!(
            topic = DOCUMENT_EVENT_TOPIC,
            doc_id = %event.doc_id,
            kind = ?event.kind,
            status = %event.status,
            subscribers = delivered,
            "Published document event"
        );
        Ok(delivered)
    }

    /// Open an independent subscription that lives until `cancel` fires or the bus closes.
    ///
    /// The returned stream ends exactly once, on whichever of those happens first.
    pub fn subscribe(
        &self,
        cancel: CancellationToken,
    ) -> Result<impl Stream<Item = DocumentEvent> + Send + 'static + use<>, EventBusError> {
        let mut receiver = self
            .sender
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(broadcast::Sender::subscribe)
            .ok_or(EventBusError::Closed)?;

        Ok(stream! {
            loop {
                let received = tokio::select! {
                    _ = cancel.cancelled() => break,
                    received = receiver.recv() => received,
                };
                match received {
                    Ok(payload) => match serde_json::from_str::<DocumentEvent>(&payload) {
                        Ok(event) => yield event,
                        Err(error) => {
                            tracing::error!(error = %error, "Failed to decode document event");
                        }
                    },
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Subscriber lagged; dropped document events");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            tracing::debug!(topic = DOCUMENT_EVENT_TOPIC, "Document event subscription closed");
        })
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.sender
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map_or(0, broadcast::Sender::receiver_count)
    }

    /// Shut the transport down. Pending events are still delivered to existing subscribers,
    /// after which their streams end; later publishes fail with [`EventBusError::Closed`].
    pub fn close(&self) {
        self.sender
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}
