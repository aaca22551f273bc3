//! Ports - 抽象化レイヤー
//!
//! 各 trait は外部システム（queue service, backend function, 時刻, 乱数）への
//! インターフェースで、実装は constructor で注入する（process-wide singleton にしない）。

pub mod backend;
pub mod clock;
pub mod delay;
pub mod event_sink;
pub mod id_generator;
pub mod queue;

// 主要な trait を再エクスポート
pub use self::backend::BackendInvoker;
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::delay::{DelayStrategy, FixedDelay, UniformDelay};
pub use self::event_sink::{CollectingExpirySink, ExpiredMessage, ExpirySink, LogExpirySink};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::queue::{Acknowledgement, MAX_BATCH_SIZE, MessageQueue};
