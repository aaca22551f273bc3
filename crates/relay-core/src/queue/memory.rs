//! In-memory queue implementation.

use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Notify};

use super::{MessageRecord, MessageState, QueueSettings};
use crate::domain::{Attributes, Delivery, QueueError, QueueMessageId, ReceiptHandle};
use crate::observability::QueueCounts;
use crate::ports::clock::add_duration;
use crate::ports::{
    Acknowledgement, Clock, ExpiredMessage, ExpirySink, IdGenerator, LogExpirySink,
    MAX_BATCH_SIZE, MessageQueue, SystemClock, UlidGenerator,
};

/// How often a waiting dequeue re-checks for expired leases.
const LEASE_RECHECK_INTERVAL: Duration = Duration::from_millis(500);

/// Upper bound for a single long-poll.
const MAX_WAIT: Duration = Duration::from_secs(60 * 60);

/// Lease expiry entry for the priority queue.
///
/// Reverse ordering so BinaryHeap acts as a min-heap (earliest first).
#[derive(Debug, Clone, PartialEq, Eq)]
struct LeaseExpiry {
    visible_at: DateTime<Utc>,
    message_id: QueueMessageId,
    receipt: ReceiptHandle,
}

impl PartialOrd for LeaseExpiry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for LeaseExpiry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .visible_at
            .cmp(&self.visible_at)
            .then_with(|| other.receipt.cmp(&self.receipt))
    }
}

/// In-memory queue state.
struct InMemoryQueueState {
    /// All stored messages (single source of truth).
    records: HashMap<QueueMessageId, MessageRecord>,

    /// Visible messages in arrival order (ids only).
    ready: VecDeque<QueueMessageId>,

    /// Active leases ordered by expiry. Entries for acknowledged or purged
    /// messages are left in place and skipped when popped.
    leases: BinaryHeap<LeaseExpiry>,

    /// receipt -> message, for the current lease of each in-flight message.
    receipts: HashMap<ReceiptHandle, QueueMessageId>,

    acknowledged: u64,
    expired: u64,
    closed: bool,
    send_denied: bool,
}

impl InMemoryQueueState {
    fn new() -> Self {
        Self {
            records: HashMap::new(),
            ready: VecDeque::new(),
            leases: BinaryHeap::new(),
            receipts: HashMap::new(),
            acknowledged: 0,
            expired: 0,
            closed: false,
            send_denied: false,
        }
    }

    /// Purge retention-expired messages, then return lapsed leases to `ready`.
    fn sweep(&mut self, now: DateTime<Utc>, retention: Duration) -> Vec<ExpiredMessage> {
        let expired = self.purge_expired(now, retention);
        self.release_expired_leases(now);
        expired
    }

    fn purge_expired(&mut self, now: DateTime<Utc>, retention: Duration) -> Vec<ExpiredMessage> {
        let Some(cutoff) = chrono::Duration::from_std(retention)
            .ok()
            .and_then(|r| now.checked_sub_signed(r))
        else {
            return Vec::new();
        };

        let expired_ids: Vec<QueueMessageId> = self
            .records
            .values()
            .filter(|r| r.is_expired(cutoff))
            .map(|r| r.message_id)
            .collect();
        if expired_ids.is_empty() {
            return Vec::new();
        }

        let mut purged = Vec::with_capacity(expired_ids.len());
        for id in expired_ids {
            let Some(record) = self.records.remove(&id) else {
                continue;
            };
            if let Some(receipt) = record.lease {
                self.receipts.remove(&receipt);
            }
            purged.push(ExpiredMessage {
                message_id: record.message_id,
                body: record.body,
                attributes: record.attributes,
                enqueued_at: record.enqueued_at,
                expired_at: now,
                receive_count: record.receive_count,
            });
        }
        let records = &self.records;
        self.ready.retain(|id| records.contains_key(id));
        self.expired += purged.len() as u64;
        purged
    }

    /// Move in-flight messages whose visibility timeout lapsed back to `ready`.
    fn release_expired_leases(&mut self, now: DateTime<Utc>) -> usize {
        let mut released = 0;
        while let Some(entry) = self.leases.peek() {
            if entry.visible_at > now {
                break; // Heap is sorted, so we can stop
            }
            let Some(entry) = self.leases.pop() else {
                break;
            };
            if let Some(record) = self.records.get_mut(&entry.message_id)
                && record.release_lease(&entry.receipt)
            {
                self.receipts.remove(&entry.receipt);
                self.ready.push_back(entry.message_id);
                released += 1;
            }
        }
        released
    }

    fn lease_ready(
        &mut self,
        max: usize,
        now: DateTime<Utc>,
        visibility_timeout: Duration,
        ids: &dyn IdGenerator,
    ) -> Vec<Delivery> {
        let visible_at = add_duration(now, visibility_timeout);
        let mut deliveries = Vec::with_capacity(max.min(self.ready.len()));
        while deliveries.len() < max {
            let Some(message_id) = self.ready.pop_front() else {
                break;
            };
            let Some(record) = self.records.get_mut(&message_id) else {
                continue;
            };
            if !record.state.is_deliverable() {
                continue;
            }
            let receipt = ids.receipt_handle();
            deliveries.push(record.start_lease(receipt));
            self.receipts.insert(receipt, message_id);
            self.leases.push(LeaseExpiry {
                visible_at,
                message_id,
                receipt,
            });
        }
        deliveries
    }

    fn acknowledge(&mut self, receipt: &ReceiptHandle) -> Acknowledgement {
        let Some(message_id) = self.receipts.remove(receipt) else {
            return Acknowledgement::Stale;
        };
        match self.records.get(&message_id) {
            Some(record) if record.holds(receipt) => {
                self.records.remove(&message_id);
                self.acknowledged += 1;
                Acknowledgement::Deleted
            }
            _ => Acknowledgement::Stale,
        }
    }

    fn counts(&self) -> QueueCounts {
        let mut counts = QueueCounts {
            acknowledged: self.acknowledged,
            expired: self.expired,
            ..QueueCounts::default()
        };
        for record in self.records.values() {
            match record.state {
                MessageState::Visible => counts.visible += 1,
                MessageState::InFlight => counts.in_flight += 1,
            }
        }
        counts
    }
}

/// In-memory queue implementation.
///
/// All state sits behind one mutex that is never held across an await on
/// anything but itself. Expiry notifications are delivered after the lock is
/// released.
pub struct InMemoryQueue {
    name: String,
    settings: QueueSettings,
    state: Mutex<InMemoryQueueState>,
    notify: Notify,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    expiry_sink: Arc<dyn ExpirySink>,
}

impl InMemoryQueue {
    pub fn new(name: impl Into<String>, settings: QueueSettings) -> Self {
        Self {
            name: name.into(),
            settings,
            state: Mutex::new(InMemoryQueueState::new()),
            notify: Notify::new(),
            clock: Arc::new(SystemClock),
            ids: Arc::new(UlidGenerator::new(SystemClock)),
            expiry_sink: Arc::new(LogExpirySink),
        }
    }

    /// Use `clock` for visibility/retention and for id timestamps.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.ids = Arc::new(UlidGenerator::new(Arc::clone(&clock)));
        self.clock = clock;
        self
    }

    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    pub fn with_expiry_sink(mut self, sink: Arc<dyn ExpirySink>) -> Self {
        self.expiry_sink = sink;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> &QueueSettings {
        &self.settings
    }

    /// Reject every further operation with `QueueError::Unavailable`.
    pub async fn close(&self) {
        self.state.lock().await.closed = true;
        self.notify.notify_waiters();
    }

    /// Reject further enqueues with `QueueError::PermissionDenied`.
    /// Dequeue and acknowledge keep working.
    pub async fn deny_send(&self) {
        self.state.lock().await.send_denied = true;
    }

    fn unavailable(&self) -> QueueError {
        QueueError::Unavailable(format!("queue '{}' is closed", self.name))
    }

    fn report_expired(&self, expired: Vec<ExpiredMessage>) {
        for message in &expired {
            self.expiry_sink.message_expired(message);
        }
    }
}

#[async_trait]
impl MessageQueue for InMemoryQueue {
    async fn enqueue(
        &self,
        body: String,
        attributes: Attributes,
    ) -> Result<QueueMessageId, QueueError> {
        let limit = self.settings.max_payload_bytes;
        if body.len() > limit {
            return Err(QueueError::PayloadTooLarge {
                size: body.len(),
                limit,
            });
        }

        let message_id = {
            let mut state = self.state.lock().await;
            if state.closed {
                return Err(self.unavailable());
            }
            if state.send_denied {
                return Err(QueueError::PermissionDenied(format!(
                    "sending to queue '{}' is not allowed",
                    self.name
                )));
            }
            let message_id = self.ids.queue_message_id();
            let record = MessageRecord::new(message_id, body, attributes, self.clock.now());
            state.records.insert(message_id, record);
            state.ready.push_back(message_id);
            message_id
        };

        // Notify waiting consumers outside the lock
        self.notify.notify_one();
        tracing::debug!(queue = %self.name, %message_id, "message stored");
        Ok(message_id)
    }

    async fn dequeue(
        &self,
        max_messages: usize,
        wait: Duration,
    ) -> Result<Vec<Delivery>, QueueError> {
        if max_messages == 0 || max_messages > MAX_BATCH_SIZE {
            return Err(QueueError::InvalidBatchSize {
                requested: max_messages,
                max: MAX_BATCH_SIZE,
            });
        }

        let deadline = tokio::time::Instant::now() + wait.min(MAX_WAIT);
        loop {
            let (deliveries, expired) = {
                let mut state = self.state.lock().await;
                if state.closed {
                    return Err(self.unavailable());
                }
                let now = self.clock.now();
                let expired = state.sweep(now, self.settings.retention);
                let deliveries = state.lease_ready(
                    max_messages,
                    now,
                    self.settings.visibility_timeout,
                    self.ids.as_ref(),
                );
                (deliveries, expired)
            };
            self.report_expired(expired);

            if !deliveries.is_empty() {
                tracing::debug!(queue = %self.name, count = deliveries.len(), "messages leased");
                return Ok(deliveries);
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(deliveries);
            }

            // Wait for an enqueue, or re-check lapsed leases periodically
            let recheck = (tokio::time::Instant::now() + LEASE_RECHECK_INTERVAL).min(deadline);
            tokio::select! {
                _ = self.notify.notified() => {},
                _ = tokio::time::sleep_until(recheck) => {},
            }
        }
    }

    async fn acknowledge(&self, receipt: &ReceiptHandle) -> Result<Acknowledgement, QueueError> {
        let (ack, expired) = {
            let mut state = self.state.lock().await;
            if state.closed {
                return Err(self.unavailable());
            }
            let expired = state.sweep(self.clock.now(), self.settings.retention);
            (state.acknowledge(receipt), expired)
        };
        self.report_expired(expired);

        if ack == Acknowledgement::Stale {
            tracing::debug!(queue = %self.name, %receipt, "acknowledge ignored: receipt is stale");
        }
        Ok(ack)
    }

    async fn counts(&self) -> Result<QueueCounts, QueueError> {
        let (counts, expired) = {
            let mut state = self.state.lock().await;
            let expired = state.sweep(self.clock.now(), self.settings.retention);
            (state.counts(), expired)
        };
        self.report_expired(expired);
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{CollectingExpirySink, FixedClock};
    use chrono::TimeZone;
    use rstest::rstest;

    fn fixed_clock() -> FixedClock {
        FixedClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
    }

    fn queue_with(clock: &FixedClock) -> InMemoryQueue {
        InMemoryQueue::new("test", QueueSettings::default()).with_clock(Arc::new(clock.clone()))
    }

    async fn enqueue_n(queue: &InMemoryQueue, n: usize) -> Vec<QueueMessageId> {
        let mut ids = Vec::with_capacity(n);
        for i in 0..n {
            ids.push(queue.enqueue(format!("body-{i}"), Attributes::new()).await.unwrap());
        }
        ids
    }

    #[tokio::test]
    async fn enqueue_and_counts() {
        let clock = fixed_clock();
        let queue = queue_with(&clock);
        enqueue_n(&queue, 1).await;

        let counts = queue.counts().await.unwrap();
        assert_eq!(counts.visible, 1);
        assert_eq!(counts.in_flight, 0);
    }

    #[tokio::test]
    async fn dequeue_transitions_to_in_flight() {
        let clock = fixed_clock();
        let queue = queue_with(&clock);
        let ids = enqueue_n(&queue, 1).await;

        let batch = queue.dequeue(10, Duration::ZERO).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].message_id, ids[0]);
        assert_eq!(batch[0].body, "body-0");
        assert_eq!(batch[0].receive_count, 1);

        let counts = queue.counts().await.unwrap();
        assert_eq!(counts.visible, 0);
        assert_eq!(counts.in_flight, 1);
    }

    #[tokio::test]
    async fn dequeue_respects_batch_size() {
        let clock = fixed_clock();
        let queue = queue_with(&clock);
        enqueue_n(&queue, 15).await;

        assert_eq!(queue.dequeue(10, Duration::ZERO).await.unwrap().len(), 10);
        assert_eq!(queue.dequeue(10, Duration::ZERO).await.unwrap().len(), 5);
        assert!(queue.dequeue(10, Duration::ZERO).await.unwrap().is_empty());
    }

    #[rstest]
    #[case::zero(0)]
    #[case::above_max(11)]
    #[tokio::test]
    async fn dequeue_rejects_invalid_batch_size(#[case] requested: usize) {
        let queue = InMemoryQueue::new("test", QueueSettings::default());
        let err = queue.dequeue(requested, Duration::ZERO).await.unwrap_err();
        assert!(matches!(err, QueueError::InvalidBatchSize { max: 10, .. }));
    }

    #[tokio::test]
    async fn leased_message_is_invisible_until_timeout() {
        let clock = fixed_clock();
        let queue = queue_with(&clock);
        enqueue_n(&queue, 1).await;

        let first = queue.dequeue(1, Duration::ZERO).await.unwrap();
        assert_eq!(first.len(), 1);

        clock.advance(Duration::from_secs(299));
        assert!(queue.dequeue(10, Duration::ZERO).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unacknowledged_message_is_redelivered_unchanged() {
        let clock = fixed_clock();
        let queue = queue_with(&clock);
        enqueue_n(&queue, 1).await;

        let first = queue.dequeue(1, Duration::ZERO).await.unwrap().remove(0);
        clock.advance(Duration::from_secs(300));
        let second = queue.dequeue(1, Duration::ZERO).await.unwrap().remove(0);

        assert_eq!(second.message_id, first.message_id);
        assert_eq!(second.body, first.body);
        assert_eq!(second.enqueued_at, first.enqueued_at);
        assert_ne!(second.receipt, first.receipt);
        assert_eq!(second.receive_count, 2);
    }

    #[tokio::test]
    async fn acknowledge_deletes_and_is_idempotent() {
        let clock = fixed_clock();
        let queue = queue_with(&clock);
        enqueue_n(&queue, 1).await;

        let delivery = queue.dequeue(1, Duration::ZERO).await.unwrap().remove(0);
        assert_eq!(
            queue.acknowledge(&delivery.receipt).await.unwrap(),
            Acknowledgement::Deleted
        );
        assert_eq!(
            queue.acknowledge(&delivery.receipt).await.unwrap(),
            Acknowledgement::Stale
        );

        clock.advance(Duration::from_secs(600));
        assert!(queue.dequeue(10, Duration::ZERO).await.unwrap().is_empty());

        let counts = queue.counts().await.unwrap();
        assert_eq!(counts.stored(), 0);
        assert_eq!(counts.acknowledged, 1);
    }

    #[tokio::test]
    async fn superseded_receipt_cannot_delete_redelivered_message() {
        let clock = fixed_clock();
        let queue = queue_with(&clock);
        enqueue_n(&queue, 1).await;

        let first = queue.dequeue(1, Duration::ZERO).await.unwrap().remove(0);
        clock.advance(Duration::from_secs(300));
        let second = queue.dequeue(1, Duration::ZERO).await.unwrap().remove(0);

        assert_eq!(
            queue.acknowledge(&first.receipt).await.unwrap(),
            Acknowledgement::Stale
        );
        assert_eq!(queue.counts().await.unwrap().in_flight, 1);
        assert_eq!(
            queue.acknowledge(&second.receipt).await.unwrap(),
            Acknowledgement::Deleted
        );
    }

    #[tokio::test]
    async fn acknowledge_after_lease_lapsed_is_stale() {
        let clock = fixed_clock();
        let queue = queue_with(&clock);
        enqueue_n(&queue, 1).await;

        let delivery = queue.dequeue(1, Duration::ZERO).await.unwrap().remove(0);
        clock.advance(Duration::from_secs(301));

        assert_eq!(
            queue.acknowledge(&delivery.receipt).await.unwrap(),
            Acknowledgement::Stale
        );
        assert_eq!(queue.counts().await.unwrap().visible, 1);
    }

    #[tokio::test]
    async fn oversized_payload_is_rejected() {
        let queue = InMemoryQueue::new(
            "test",
            QueueSettings::default().with_max_payload_bytes(8),
        );
        let err = queue
            .enqueue("123456789".to_string(), Attributes::new())
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::PayloadTooLarge { size: 9, limit: 8 }));
        assert_eq!(queue.counts().await.unwrap().stored(), 0);
    }

    #[tokio::test]
    async fn retention_purge_is_reported() {
        let clock = fixed_clock();
        let sink = Arc::new(CollectingExpirySink::new());
        let settings = QueueSettings::default().with_visibility_timeout(Duration::from_secs(60));
        let queue = InMemoryQueue::new("test", settings)
            .with_clock(Arc::new(clock.clone()))
            .with_expiry_sink(sink.clone());
        let ids = enqueue_n(&queue, 2).await;

        // One message is in flight when retention runs out; both are purged.
        queue.dequeue(1, Duration::ZERO).await.unwrap();
        clock.advance(Duration::from_secs(14 * 24 * 60 * 60));

        assert!(queue.dequeue(10, Duration::ZERO).await.unwrap().is_empty());
        let expired = sink.expired();
        assert_eq!(expired.len(), 2);
        assert!(expired.iter().any(|m| m.message_id == ids[0] && m.receive_count == 1));
        assert!(expired.iter().any(|m| m.message_id == ids[1] && m.receive_count == 0));

        let counts = queue.counts().await.unwrap();
        assert_eq!(counts.expired, 2);
        assert_eq!(counts.stored(), 0);
    }

    #[tokio::test]
    async fn closed_queue_is_unavailable() {
        let queue = InMemoryQueue::new("test", QueueSettings::default());
        queue.close().await;

        let err = queue
            .enqueue("x".to_string(), Attributes::new())
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::Unavailable(_)));
        assert!(queue.dequeue(1, Duration::ZERO).await.is_err());
    }

    #[tokio::test]
    async fn denied_send_still_allows_draining() {
        let clock = fixed_clock();
        let queue = queue_with(&clock);
        enqueue_n(&queue, 1).await;
        queue.deny_send().await;

        let err = queue
            .enqueue("x".to_string(), Attributes::new())
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::PermissionDenied(_)));

        let delivery = queue.dequeue(10, Duration::ZERO).await.unwrap().remove(0);
        assert_eq!(
            queue.acknowledge(&delivery.receipt).await.unwrap(),
            Acknowledgement::Deleted
        );
    }

    #[tokio::test(start_paused = true)]
    async fn dequeue_waits_for_enqueue() {
        let queue = Arc::new(InMemoryQueue::new("test", QueueSettings::default()));

        let waiter = tokio::spawn({
            let queue = Arc::clone(&queue);
            async move { queue.dequeue(10, Duration::from_secs(20)).await.unwrap() }
        });

        tokio::time::sleep(Duration::from_secs(1)).await;
        queue.enqueue("late".to_string(), Attributes::new()).await.unwrap();

        let batch = waiter.await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].body, "late");
    }

    #[tokio::test(start_paused = true)]
    async fn dequeue_returns_empty_after_wait() {
        let queue = InMemoryQueue::new("test", QueueSettings::default());
        let start = tokio::time::Instant::now();

        let batch = queue.dequeue(10, Duration::from_secs(2)).await.unwrap();
        assert!(batch.is_empty());
        assert!(start.elapsed() >= Duration::from_secs(2));
    }
}
