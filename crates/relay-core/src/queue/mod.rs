//! Queue module: message state, records, settings and the in-memory queue.

mod memory;
mod record;
mod settings;
mod state;

pub use memory::InMemoryQueue;
pub use record::MessageRecord;
pub use settings::QueueSettings;
pub use state::MessageState;
