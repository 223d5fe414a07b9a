use std::sync::Arc;

use missive_core::Message;
use tracing::trace;

use super::REPOSITORY;
use crate::error::PipelineResult;
use crate::pipeline::Middleware;
use crate::repository::{MessageRecord, MessageRepository};

/// Hands a snapshot of the message to a repository.
///
/// Belongs after the executor so the snapshot carries the terminal status.
pub struct RepositoryMiddleware {
    repository: Arc<dyn MessageRepository>,
}

impl RepositoryMiddleware {
    pub fn new(repository: Arc<dyn MessageRepository>) -> Self {
        Self { repository }
    }
}

impl Middleware for RepositoryMiddleware {
    fn id(&self) -> &str {
        REPOSITORY
    }

    fn handle(&self, message: &mut Message) -> PipelineResult<()> {
        let record = MessageRecord::from_message(message);
        trace!(id = %record.id, status = %record.status, "Persisting message");
        self.repository.add(record)?;
        Ok(())
    }
}
