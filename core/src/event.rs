use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::descriptor::Descriptor;

/// What happened to one node during a push or copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferAction {
    /// Already present at the destination, subtree pruned
    Skipped,
    /// Bytes written to the destination
    Pushed,
    /// Tag written for the root
    Tagged,
}

impl TransferAction {
    /// Event key for this action.
    pub fn key(&self) -> &'static str {
        match self {
            TransferAction::Skipped => events::TRANSFER_SKIPPED,
            TransferAction::Pushed => events::TRANSFER_PUSHED,
            TransferAction::Tagged => events::TRANSFER_TAGGED,
        }
    }
}

/// Transfer progress event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferEvent {
    pub action: TransferAction,

    /// Descriptor of the affected node
    pub descriptor: Descriptor,

    /// Tag name, for `Tagged` events
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,

    /// Timestamp
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl TransferEvent {
    /// Create a new event
    pub fn new(action: TransferAction, descriptor: Descriptor) -> Self {
        Self {
            action,
            descriptor,
            tag: None,
            timestamp: chrono::Utc::now(),
        }
    }

    /// Create a tag event
    pub fn tagged(descriptor: Descriptor, tag: impl Into<String>) -> Self {
        Self {
            tag: Some(tag.into()),
            ..Self::new(TransferAction::Tagged, descriptor)
        }
    }

    /// Event key (e.g., "transfer.pushed")
    pub fn key(&self) -> &'static str {
        self.action.key()
    }
}

impl std::fmt::Display for TransferEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let id = self.descriptor.short_id();
        match self.action {
            TransferAction::Skipped => {
                write!(f, "{id}: Exists        {}", self.descriptor.kind())
            }
            TransferAction::Pushed => write!(
                f,
                "{id}: Pushed        {} ({} bytes)",
                self.descriptor.kind(),
                self.descriptor.size
            ),
            TransferAction::Tagged => write!(
                f,
                "{id}: Tagged        {}",
                self.tag.as_deref().unwrap_or_default()
            ),
        }
    }
}

/// Event emitter
#[derive(Clone)]
pub struct EventEmitter {
    sender: Arc<broadcast::Sender<TransferEvent>>,
}

impl EventEmitter {
    /// Create a new event emitter
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Emit an event
    pub fn emit(&self, event: TransferEvent) {
        let _ = self.sender.send(event);
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<TransferEvent> {
        self.sender.subscribe()
    }

    /// Subscribe to events with a filter
    pub fn subscribe_filtered(
        &self,
        filter: impl Fn(&TransferEvent) -> bool + Send + Sync + 'static,
    ) -> EventStream {
        EventStream {
            receiver: self.sender.subscribe(),
            filter: Arc::new(filter),
        }
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Event stream with filtering
pub struct EventStream {
    receiver: broadcast::Receiver<TransferEvent>,
    filter: Arc<dyn Fn(&TransferEvent) -> bool + Send + Sync>,
}

impl EventStream {
    /// Receive the next matching event
    pub async fn recv(&mut self) -> Option<TransferEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if (self.filter)(&event) {
                        return Some(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Event catalog - predefined event keys
pub mod events {
    pub const TRANSFER_SKIPPED: &str = "transfer.skipped";
    pub const TRANSFER_PUSHED: &str = "transfer.pushed";
    pub const TRANSFER_TAGGED: &str = "transfer.tagged";
}
