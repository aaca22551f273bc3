//! IdGenerator port - ID 生成の抽象化
//!
//! # 実装
//! - **UlidGenerator**: ULID ベース（本番用）。Clock から timestamp を取るので、
//!   FixedClock を渡せば timestamp 部分が決定的になる。

use ulid::Ulid;

use crate::domain::{MessageId, QueueMessageId, ReceiptHandle, RequestId};
use crate::ports::Clock;

/// Generates the ids used across the pipeline.
///
/// `Send + Sync` so one generator can be shared by the publisher, the queue
/// and the backend.
pub trait IdGenerator: Send + Sync {
    fn message_id(&self) -> MessageId;

    fn queue_message_id(&self) -> QueueMessageId;

    fn receipt_handle(&self) -> ReceiptHandle;

    fn request_id(&self) -> RequestId;
}

/// ULID generator whose timestamp part comes from a `Clock`.
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }

    fn next(&self) -> Ulid {
        let timestamp_ms = self.clock.now().timestamp_millis().max(0) as u64;
        Ulid::from_parts(timestamp_ms, rand::random())
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn message_id(&self) -> MessageId {
        self.next().into()
    }

    fn queue_message_id(&self) -> QueueMessageId {
        self.next().into()
    }

    fn receipt_handle(&self) -> ReceiptHandle {
        self.next().into()
    }

    fn request_id(&self) -> RequestId {
        self.next().into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{FixedClock, SystemClock};
    use chrono::{TimeZone, Utc};

    #[test]
    fn generates_unique_ids() {
        let id_gen = UlidGenerator::new(SystemClock);

        let id1 = id_gen.message_id();
        let id2 = id_gen.message_id();
        let id3 = id_gen.message_id();

        assert_ne!(id1, id2);
        assert_ne!(id2, id3);
        assert_ne!(id1, id3);
    }

    #[test]
    fn timestamp_part_follows_the_clock() {
        let fixed_time = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let id_gen = UlidGenerator::new(FixedClock::new(fixed_time));

        let id1 = id_gen.request_id();
        let id2 = id_gen.request_id();

        // ランダム部分があるので ID は異なるが、timestamp 部分は同じ
        assert_ne!(id1, id2);
        assert_eq!(id1.timestamp_ms(), id2.timestamp_ms());
        assert_eq!(id1.timestamp_ms(), fixed_time.timestamp_millis() as u64);
    }
}
