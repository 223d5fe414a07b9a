//! Message history: the persistence port, its record type and the filter
//! used on the query side.

mod filter;
mod memory;
mod record;

pub use filter::RepositoryMessagesFilter;
pub use memory::InMemoryMessageRepository;
pub use record::{MessageRecord, MessageView};

use crate::error::RepositoryResult;

/// A persistence collaborator for terminal messages.
///
/// Implementations must be safe to call from concurrent dispatches.
pub trait MessageRepository: Send + Sync {
    /// Stores one message snapshot.
    fn add(&self, record: MessageRecord) -> RepositoryResult<()>;

    /// Returns the stored messages matching `filter`, oldest first, with the
    /// filter's paging applied.
    fn query(&self, filter: &RepositoryMessagesFilter) -> RepositoryResult<Vec<MessageRecord>>;
}
