//! Dead-letter queue items

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::now_ms;

/// Lifecycle of an item in the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DlqItemStatus {
    /// Waiting for its first processing attempt
    Pending,
    /// A handler is working on it right now
    Processing,
    /// Failed, scheduled for another attempt
    Retrying,
    /// Retry budget exhausted, needs manual operator action
    Failed,
    /// Handler succeeded
    Success,
    /// Dropped deliberately (no handler, or operator decision)
    Discarded,
}

impl std::fmt::Display for DlqItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Processing => write!(f, "processing"),
            Self::Retrying => write!(f, "retrying"),
            Self::Failed => write!(f, "failed"),
            Self::Success => write!(f, "success"),
            Self::Discarded => write!(f, "discarded"),
        }
    }
}

impl std::str::FromStr for DlqItemStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "retrying" => Ok(Self::Retrying),
            "failed" => Ok(Self::Failed),
            "success" => Ok(Self::Success),
            "discarded" => Ok(Self::Discarded),
            _ => Err(format!("Unknown status: {}", s)),
        }
    }
}

/// One entry in an item's processing history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub action: String,
    /// Unix milliseconds
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl HistoryEntry {
    fn new(action: impl Into<String>, detail: Option<String>) -> Self {
        Self {
            action: action.into(),
            timestamp: now_ms(),
            detail,
        }
    }
}

/// A failed operation retained for retry or inspection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterItem {
    pub id: String,
    pub operation_type: String,
    /// Opaque payload handed back to the registered handler
    pub payload: Value,
    /// Description of the original failure
    pub error_info: String,
    pub status: DlqItemStatus,
    /// Unix milliseconds
    pub created_at: i64,
    /// Unix milliseconds
    pub updated_at: i64,
    pub retry_count: u32,
    pub max_retries: u32,
    /// Unix milliseconds; set only while status is Retrying
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_retry_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// 1 = highest, 10 = lowest
    pub priority: u8,
}

impl DeadLetterItem {
    pub fn new(
        operation_type: impl Into<String>,
        payload: Value,
        error_info: impl Into<String>,
        max_retries: u32,
        priority: u8,
        tags: Vec<String>,
    ) -> Self {
        let now = now_ms();
        Self {
            id: uuid::Uuid::now_v7().to_string(),
            operation_type: operation_type.into(),
            payload,
            error_info: error_info.into(),
            status: DlqItemStatus::Pending,
            created_at: now,
            updated_at: now,
            retry_count: 0,
            max_retries,
            next_retry_at: None,
            last_error: None,
            history: Vec::new(),
            tags,
            priority: priority.clamp(1, 10),
        }
    }

    /// Mark the item as being processed
    pub fn mark_processing(&mut self) {
        self.status = DlqItemStatus::Processing;
        self.updated_at = now_ms();
        self.history.push(HistoryEntry::new("processing_started", None));
    }

    /// Schedule another attempt after `delay_secs`
    pub fn mark_retry(&mut self, delay_secs: u64) {
        self.retry_count += 1;
        self.status = DlqItemStatus::Retrying;
        self.updated_at = now_ms();
        self.next_retry_at = Some(now_ms() + (delay_secs as i64) * 1000);
        self.history.push(HistoryEntry::new(
            "scheduled_retry",
            Some(format!("retry {} in {}s", self.retry_count, delay_secs)),
        ));
    }

    /// Mark the item successfully processed
    pub fn mark_success(&mut self) {
        self.status = DlqItemStatus::Success;
        self.updated_at = now_ms();
        self.next_retry_at = None;
        self.history.push(HistoryEntry::new("success", None));
    }

    /// Mark the item permanently failed
    pub fn mark_failed(&mut self, error: impl Into<String>) {
        let error = error.into();
        self.status = DlqItemStatus::Failed;
        self.last_error = Some(error.clone());
        self.updated_at = now_ms();
        self.next_retry_at = None;
        self.history.push(HistoryEntry::new("failed", Some(error)));
    }

    /// Mark the item discarded with a reason
    pub fn mark_discarded(&mut self, reason: impl Into<String>) {
        self.status = DlqItemStatus::Discarded;
        self.updated_at = now_ms();
        self.next_retry_at = None;
        self.history.push(HistoryEntry::new("discarded", Some(reason.into())));
    }

    /// Reset the retry budget so the item is picked up again
    pub fn reset_for_retry(&mut self) {
        self.retry_count = 0;
        self.status = DlqItemStatus::Pending;
        self.next_retry_at = None;
        self.updated_at = now_ms();
        self.history.push(HistoryEntry::new("manual_requeue", None));
    }

    /// Whether a sweep should pick this item up now
    pub fn is_ready_for_retry(&self) -> bool {
        if !matches!(self.status, DlqItemStatus::Pending | DlqItemStatus::Retrying) {
            return false;
        }
        if self.retry_count >= self.max_retries {
            return false;
        }
        match self.next_retry_at {
            Some(at) => now_ms() >= at,
            None => true,
        }
    }

    /// Whether the item reached a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            DlqItemStatus::Failed | DlqItemStatus::Success | DlqItemStatus::Discarded
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item() -> DeadLetterItem {
        DeadLetterItem::new(
            "webhook_delivery",
            serde_json::json!({"url": "https://example.com/hook", "body": {"ok": true}}),
            "connection reset by peer",
            3,
            5,
            vec!["invoices".to_string()],
        )
    }

    #[test]
    fn test_new_item_is_pending_and_ready() {
        let item = item();
        assert_eq!(item.status, DlqItemStatus::Pending);
        assert_eq!(item.retry_count, 0);
        assert!(item.is_ready_for_retry());
        assert!(!item.is_terminal());
    }

    #[test]
    fn test_priority_clamped() {
        let low = DeadLetterItem::new("t", Value::Null, "e", 1, 0, vec![]);
        let high = DeadLetterItem::new("t", Value::Null, "e", 1, 99, vec![]);
        assert_eq!(low.priority, 1);
        assert_eq!(high.priority, 10);
    }

    #[test]
    fn test_mark_retry_schedules_future() {
        let mut item = item();
        item.mark_retry(60);

        assert_eq!(item.status, DlqItemStatus::Retrying);
        assert_eq!(item.retry_count, 1);
        let at = item.next_retry_at.unwrap();
        assert!(at > now_ms());
        // Scheduled in the future, so not ready yet
        assert!(!item.is_ready_for_retry());
    }

    #[test]
    fn test_retry_ceiling() {
        let mut item = item();
        item.mark_retry(0);
        item.mark_retry(0);
        item.mark_retry(0);

        assert_eq!(item.retry_count, item.max_retries);
        // Budget exhausted: never ready again even though the schedule elapsed
        assert!(!item.is_ready_for_retry());

        item.mark_failed("gave up");
        assert!(item.is_terminal());
        assert!(!item.is_ready_for_retry());
    }

    #[test]
    fn test_mark_success_clears_schedule() {
        let mut item = item();
        item.mark_retry(60);
        item.mark_success();
        assert_eq!(item.status, DlqItemStatus::Success);
        assert!(item.next_retry_at.is_none());
    }

    #[test]
    fn test_reset_for_retry() {
        let mut item = item();
        item.mark_retry(0);
        item.mark_retry(0);
        item.mark_retry(0);
        item.mark_failed("exhausted");

        item.reset_for_retry();
        assert_eq!(item.status, DlqItemStatus::Pending);
        assert_eq!(item.retry_count, 0);
        assert!(item.is_ready_for_retry());
    }

    #[test]
    fn test_history_records_every_mutation() {
        let mut item = item();
        item.mark_processing();
        item.mark_retry(10);
        item.mark_processing();
        item.mark_failed("boom");

        let actions: Vec<_> = item.history.iter().map(|h| h.action.as_str()).collect();
        assert_eq!(
            actions,
            vec!["processing_started", "scheduled_retry", "processing_started", "failed"]
        );
    }

    #[test]
    fn test_serde_round_trip_preserves_everything() {
        let mut item = item();
        item.mark_processing();
        item.mark_retry(30);

        let json = serde_json::to_string_pretty(&item).unwrap();
        let back: DeadLetterItem = serde_json::from_str(&json).unwrap();
        assert_eq!(item, back);

        // serialize -> deserialize -> serialize must be stable
        let json2 = serde_json::to_string_pretty(&back).unwrap();
        assert_eq!(json, json2);
    }
}
