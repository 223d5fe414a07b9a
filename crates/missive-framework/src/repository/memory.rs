use std::collections::VecDeque;

use parking_lot::RwLock;
use tracing::trace;

use super::{MessageRecord, MessageRepository, RepositoryMessagesFilter};
use crate::error::RepositoryResult;

/// Keeps message history in memory.
///
/// With a capacity the oldest record is evicted once the buffer is full.
#[derive(Debug, Default)]
pub struct InMemoryMessageRepository {
    records: RwLock<VecDeque<MessageRecord>>,
    capacity: Option<usize>,
}

impl InMemoryMessageRepository {
    /// An unbounded repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// A repository holding at most `capacity` records.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: RwLock::new(VecDeque::with_capacity(capacity)),
            capacity: Some(capacity),
        }
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    pub fn clear(&self) {
        self.records.write().clear();
    }

    /// Every stored record, oldest first.
    pub fn records(&self) -> Vec<MessageRecord> {
        self.records.read().iter().cloned().collect()
    }
}

impl MessageRepository for InMemoryMessageRepository {
    fn add(&self, record: MessageRecord) -> RepositoryResult<()> {
        if self.capacity == Some(0) {
            return Ok(());
        }
        let mut records = self.records.write();
        if self.capacity.is_some_and(|capacity| records.len() >= capacity)
            && let Some(evicted) = records.pop_front()
        {
            trace!(message_id = %evicted.id, "Evicting oldest message record");
        }
        records.push_back(record);
        Ok(())
    }

    fn query(&self, filter: &RepositoryMessagesFilter) -> RepositoryResult<Vec<MessageRecord>> {
        let records = self.records.read();
        let matches = records.iter().filter(|record| filter.is_match(*record));
        Ok(filter.page(matches).cloned().collect())
    }
}
