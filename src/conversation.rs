//! Conversation identity, history loading, and the dedup/merge engine.

pub mod history;
pub mod key;
pub mod merge;
pub mod summary;

pub use history::{ConversationHistory, HistoryFetcher};
pub use key::{ConversationKey, KeyResolver, KeySource};
pub use merge::{DedupSet, MergeOrder, MergeOutcome, MessageLog};
pub use summary::{ConversationList, ConversationSummary, DocumentRef, LastMessage};
