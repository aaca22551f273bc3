//! Domain model (ids, messages, deliveries, invocations, errors).

pub mod delivery;
pub mod errors;
pub mod ids;
pub mod invocation;
pub mod message;

pub use self::delivery::Delivery;
pub use self::errors::{InvokeError, ProcessError, PublishError, QueueError};
pub use self::ids::{
    Id, IdMarker, MessageId, ParseIdError, QueueMessageId, ReceiptHandle, RequestId,
};
pub use self::invocation::{BackendResponse, CONSUMER_SOURCE, InvocationRequest};
pub use self::message::{Attributes, MESSAGE_TYPE_ATTRIBUTE, Message, PUBLISHER_SOURCE};
