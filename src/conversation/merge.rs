//! Dedup & merge engine.
//!
//! Folds messages into a surface's ordered list exactly once. The message id is
//! the only identity: timestamps and content are never trusted for dedup. The
//! client never renders its own sends directly; they arrive back through the
//! inbound path and pass through here like any other message.

use crate::error::ConfigError;
use crate::{Message, MessageId};

use indexmap::IndexSet;
use serde::Deserialize;

/// Rendering order of merged messages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeOrder {
    /// Delivery order. O(1) append.
    #[default]
    Arrival,
    /// Server timestamp with the id as tiebreaker. O(log n) insert.
    Timestamp,
}

impl std::str::FromStr for MergeOrder {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "arrival" => Ok(MergeOrder::Arrival),
            "timestamp" => Ok(MergeOrder::Timestamp),
            other => Err(ConfigError::Invalid(format!(
                "merge order must be \"arrival\" or \"timestamp\", got {other:?}"
            ))),
        }
    }
}

/// Insertion-ordered set of message ids already rendered by one surface.
#[derive(Debug, Clone, Default)]
pub struct DedupSet {
    ids: IndexSet<MessageId>,
}

impl DedupSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the id was not present before.
    pub fn insert(&mut self, id: MessageId) -> bool {
        self.ids.insert(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MessageId> {
        self.ids.iter()
    }

    pub fn clear(&mut self) {
        self.ids.clear();
    }
}

/// What happened to a message offered to [`MessageLog::merge`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Inserted at `index` of the visible list.
    Appended { index: usize },
    /// Id already seen; discarded.
    Duplicate,
}

/// A surface's visible message list plus the dedup set guarding it.
#[derive(Debug, Clone, Default)]
pub struct MessageLog {
    seen: DedupSet,
    messages: Vec<Message>,
    order: MergeOrder,
}

impl MessageLog {
    pub fn new(order: MergeOrder) -> Self {
        Self {
            seen: DedupSet::new(),
            messages: Vec::new(),
            order,
        }
    }

    /// Replace the log with a history snapshot (oldest first).
    ///
    /// Every id is recorded so live redelivery of history is discarded. Returns
    /// the number of messages kept after dropping duplicates within the snapshot.
    pub fn seed(&mut self, history: Vec<Message>) -> usize {
        self.reset();
        for message in history {
            if self.seen.insert(message.id.clone()) {
                self.messages.push(message);
            }
        }
        if self.order == MergeOrder::Timestamp {
            self.messages
                .sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
        }
        self.messages.len()
    }

    /// Fold one inbound message in, at most once per id.
    pub fn merge(&mut self, message: Message) -> MergeOutcome {
        if !self.seen.insert(message.id.clone()) {
            tracing::debug!(message_id = %message.id, "duplicate message discarded");
            return MergeOutcome::Duplicate;
        }

        let index = match self.order {
            MergeOrder::Arrival => self.messages.len(),
            MergeOrder::Timestamp => self.messages.partition_point(|existing| {
                (existing.created_at, &existing.id) <= (message.created_at, &message.id)
            }),
        };
        self.messages.insert(index, message);
        MergeOutcome::Appended { index }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn seen(&self) -> &DedupSet {
        &self.seen
    }

    pub fn contains(&self, id: &str) -> bool {
        self.seen.contains(id)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn order(&self) -> MergeOrder {
        self.order
    }

    /// Forget everything. Used when the surface switches conversations.
    pub fn reset(&mut self) {
        self.seen.clear();
        self.messages.clear();
    }
}
