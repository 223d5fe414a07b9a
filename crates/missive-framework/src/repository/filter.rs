//! Predicate builder for history queries.

use chrono::{DateTime, Utc};
use missive_core::{MessageKind, MessageStatus};
use regex::Regex;

use super::MessageView;
use crate::error::{FilterError, FilterResult};

/// An immutable, chainable predicate over stored messages.
///
/// Every `with_*` call returns a new filter with that field set or replaced.
/// [`is_match`](Self::is_match) requires every configured field to match;
/// unset fields match anything. Content-type and error-kind patterns are
/// regular expressions matched anywhere in the name.
///
/// ```rust,ignore
/// let filter = RepositoryMessagesFilter::create()
///     .with_status(MessageStatus::Failed)
///     .with_execution_duration_above(100)
///     .with_include_content_type(r"^orders::")?
///     .with_kind(MessageKind::Command);
/// ```
#[derive(Debug, Clone, Default)]
pub struct RepositoryMessagesFilter {
    statuses: Option<Vec<MessageStatus>>,
    kinds: Option<Vec<MessageKind>>,
    min_duration_ms: Option<u64>,
    max_duration_ms: Option<u64>,
    include_content_type: Option<Regex>,
    exclude_content_type: Option<Regex>,
    error_kind: Option<Regex>,
    created_after: Option<DateTime<Utc>>,
    created_before: Option<DateTime<Utc>>,
    skip: usize,
    take: Option<usize>,
}

fn compile(field: &'static str, pattern: &str) -> FilterResult<Regex> {
    Regex::new(pattern).map_err(|source| FilterError {
        field,
        pattern: pattern.to_string(),
        source,
    })
}

impl RepositoryMessagesFilter {
    /// A filter matching every message.
    pub fn create() -> Self {
        Self::default()
    }

    /// Matches messages in exactly this status.
    pub fn with_status(self, status: MessageStatus) -> Self {
        self.with_statuses([status])
    }

    /// Matches messages in any of these statuses.
    pub fn with_statuses(mut self, statuses: impl IntoIterator<Item = MessageStatus>) -> Self {
        self.statuses = Some(statuses.into_iter().collect());
        self
    }

    pub fn with_kind(self, kind: MessageKind) -> Self {
        self.with_kinds([kind])
    }

    pub fn with_kinds(mut self, kinds: impl IntoIterator<Item = MessageKind>) -> Self {
        self.kinds = Some(kinds.into_iter().collect());
        self
    }

    /// Matches messages that ran for strictly longer than `ms` milliseconds.
    /// Messages that never ran do not match.
    pub fn with_execution_duration_above(mut self, ms: u64) -> Self {
        self.min_duration_ms = Some(ms);
        self
    }

    /// Matches messages that ran for strictly less than `ms` milliseconds.
    pub fn with_execution_duration_below(mut self, ms: u64) -> Self {
        self.max_duration_ms = Some(ms);
        self
    }

    /// Keeps content types whose name contains a match of `pattern`.
    pub fn with_include_content_type(mut self, pattern: &str) -> FilterResult<Self> {
        self.include_content_type = Some(compile("include content type", pattern)?);
        Ok(self)
    }

    /// Drops content types whose name contains a match of `pattern`.
    pub fn with_exclude_content_type(mut self, pattern: &str) -> FilterResult<Self> {
        self.exclude_content_type = Some(compile("exclude content type", pattern)?);
        Ok(self)
    }

    /// Keeps failed messages whose error type name contains a match of `pattern`.
    pub fn with_error_kind(mut self, pattern: &str) -> FilterResult<Self> {
        self.error_kind = Some(compile("error kind", pattern)?);
        Ok(self)
    }

    /// Inclusive lower bound on the creation time.
    pub fn with_created_after(mut self, at: DateTime<Utc>) -> Self {
        self.created_after = Some(at);
        self
    }

    /// Inclusive upper bound on the creation time.
    pub fn with_created_before(mut self, at: DateTime<Utc>) -> Self {
        self.created_before = Some(at);
        self
    }

    /// Number of matches a repository skips before returning results.
    pub fn with_skip(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }

    /// Maximum number of matches a repository returns.
    pub fn with_take(mut self, take: usize) -> Self {
        self.take = Some(take);
        self
    }

    pub fn skip(&self) -> usize {
        self.skip
    }

    pub fn take(&self) -> Option<usize> {
        self.take
    }

    /// Applies skip and take to an iterator of matches.
    pub fn page<I: Iterator>(&self, matches: I) -> impl Iterator<Item = I::Item> {
        matches.skip(self.skip).take(self.take.unwrap_or(usize::MAX))
    }

    /// Returns `true` if `message` satisfies every configured field.
    ///
    /// Paging is not part of the predicate.
    pub fn is_match<V: MessageView + ?Sized>(&self, message: &V) -> bool {
        if let Some(statuses) = &self.statuses
            && !statuses.contains(&message.status())
        {
            return false;
        }
        if let Some(kinds) = &self.kinds
            && !kinds.contains(&message.kind())
        {
            return false;
        }

        let duration = message.execution_duration_ms();
        if let Some(min) = self.min_duration_ms
            && !duration.is_some_and(|ms| ms > min)
        {
            return false;
        }
        if let Some(max) = self.max_duration_ms
            && !duration.is_some_and(|ms| ms < max)
        {
            return false;
        }

        let content_type = message.content_type_name();
        if let Some(include) = &self.include_content_type
            && !include.is_match(content_type)
        {
            return false;
        }
        if let Some(exclude) = &self.exclude_content_type
            && exclude.is_match(content_type)
        {
            return false;
        }
        if let Some(pattern) = &self.error_kind
            && !message.error_kind().is_some_and(|kind| pattern.is_match(kind))
        {
            return false;
        }

        let created = message.created_at();
        !(self.created_after.is_some_and(|after| created < after)
            || self.created_before.is_some_and(|before| created > before))
    }
}
