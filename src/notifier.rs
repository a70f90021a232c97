//! Record change notifications
//!
//! One broadcast channel per tool id. Delivery is best-effort: events with
//! no listeners are dropped and a failed send never affects the mutation
//! that produced it.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, trace};

/// Default broadcast channel capacity
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordChangeEvent {
    pub tool_id: String,
    pub record_id: String,
    pub action_type: ChangeKind,
    pub actor_id: String,
}

impl RecordChangeEvent {
    pub fn new(
        tool_id: impl Into<String>,
        record_id: impl Into<String>,
        action_type: ChangeKind,
        actor_id: impl Into<String>,
    ) -> Self {
        Self {
            tool_id: tool_id.into(),
            record_id: record_id.into(),
            action_type,
            actor_id: actor_id.into(),
        }
    }

    /// Room name a realtime layer would fan this event out to
    pub fn room(&self) -> String {
        format!("tool:{}", self.tool_id)
    }
}

pub struct ChangeNotifier {
    channels: RwLock<HashMap<String, broadcast::Sender<RecordChangeEvent>>>,
    capacity: usize,
}

impl Default for ChangeNotifier {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl ChangeNotifier {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Receive every subsequent event for one tool
    pub fn subscribe(&self, tool_id: &str) -> broadcast::Receiver<RecordChangeEvent> {
        if let Some(sender) = self.channels.read().get(tool_id) {
            return sender.subscribe();
        }
        let mut channels = self.channels.write();
        channels
            .entry(tool_id.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Publish an event; returns how many receivers got it
    pub fn emit(&self, event: RecordChangeEvent) -> usize {
        let tool_id = event.tool_id.clone();
        let delivered = match self.channels.read().get(&tool_id) {
            Some(sender) => sender.send(event).ok(),
            None => {
                trace!(tool_id = %tool_id, "No subscribers, event dropped");
                return 0;
            }
        };

        match delivered {
            Some(count) => count,
            None => {
                // Every receiver is gone
                let mut channels = self.channels.write();
                if channels
                    .get(&tool_id)
                    .is_some_and(|sender| sender.receiver_count() == 0)
                {
                    channels.remove(&tool_id);
                    debug!(tool_id = %tool_id, "Pruned change channel with no receivers");
                }
                0
            }
        }
    }

    /// Number of live receivers for a tool
    pub fn subscriber_count(&self, tool_id: &str) -> usize {
        self.channels
            .read()
            .get(tool_id)
            .map_or(0, |sender| sender.receiver_count())
    }
}
