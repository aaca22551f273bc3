//! relay-core
//!
//! Queue-mediated event delivery: a publisher enqueues events, a consumer
//! drains them in batches and forwards each one to a backend.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, message, delivery, invocation, errors）
//! - **ports**: 抽象化レイヤー（MessageQueue, BackendInvoker, Clock, DelayStrategy, など）
//! - **queue**: in-memory queue（visibility timeout, retention, receipts）
//! - **backend**: simulated backend と in-process invoker
//! - **consumer**: batch 処理と queue binding
//! - **publisher**: ingress
//! - **config**: TOML + 環境変数の設定
//! - **observability**: status views

pub mod backend;
pub mod config;
pub mod consumer;
pub mod domain;
pub mod observability;
pub mod ports;
pub mod publisher;
pub mod queue;

pub use backend::{Backend, BackendRegistry, LocalInvoker};
pub use config::{ConfigError, PipelineConfig};
pub use consumer::{BatchDisposition, Consumer, LogicalFailurePolicy, QueueBinding};
pub use observability::QueueCounts;
pub use publisher::{IngressResponse, PublishReceipt, Publisher};
pub use queue::{InMemoryQueue, QueueSettings};
