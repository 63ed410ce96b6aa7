//! Dead-letter queue
//!
//! Durable store of operations that failed normal processing. Items are
//! retained for scheduled retry (exponential backoff, priority ordered)
//! or manual operator action; nothing is silently dropped.

mod item;
mod queue;

pub use item::{DeadLetterItem, DlqItemStatus, HistoryEntry};
pub use queue::{DeadLetterQueue, DlqConfig, DlqError, DlqHandler, DlqStats};
