//! Ordered middleware stages per message kind.
//!
//! A [`Pipeline`] runs its stages in list order. Stages record outcomes on the
//! message (rejected, completed, failed) and the run continues regardless, so
//! later stages such as the repository see the terminal state. Only a stage
//! returning a [`PipelineError`] stops the run.
//!
//! ```rust,ignore
//! let mut pipeline = Pipeline::new(MessageKind::Command)
//!     .with(LocatorMiddleware::new(locator))?
//!     .with(ExecutorMiddleware::new(engine, resolver))?;
//!
//! pipeline.insert_after("locator", middleware_fn("audit", |message| {
//!     message.set_data("audited", "true");
//!     Ok(())
//! }))?;
//! ```

use std::fmt;
use std::sync::Arc;

use missive_core::{Message, MessageKind};
use tracing::{debug_span, trace};

use crate::error::{PipelineError, PipelineResult};

/// A pipeline stage.
pub trait Middleware: Send + Sync {
    /// Identifier, unique within a pipeline.
    fn id(&self) -> &str;

    /// Processes the message in place.
    fn handle(&self, message: &mut Message) -> PipelineResult<()>;
}

/// A stage backed by a closure.
pub struct FnMiddleware<F> {
    id: String,
    f: F,
}

impl<F> Middleware for FnMiddleware<F>
where
    F: Fn(&mut Message) -> PipelineResult<()> + Send + Sync,
{
    fn id(&self) -> &str {
        &self.id
    }

    fn handle(&self, message: &mut Message) -> PipelineResult<()> {
        (self.f)(message)
    }
}

/// Wraps a closure into a stage.
pub fn middleware_fn<F>(id: impl Into<String>, f: F) -> FnMiddleware<F>
where
    F: Fn(&mut Message) -> PipelineResult<()> + Send + Sync,
{
    FnMiddleware { id: id.into(), f }
}

// =============================================================================
// Pipeline
// =============================================================================

/// The stages of one message kind.
#[derive(Clone)]
pub struct Pipeline {
    kind: MessageKind,
    stages: Vec<Arc<dyn Middleware>>,
}

impl Pipeline {
    pub fn new(kind: MessageKind) -> Self {
        Self {
            kind,
            stages: Vec::new(),
        }
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    fn position(&self, id: &str) -> PipelineResult<usize> {
        self.stages
            .iter()
            .position(|stage| stage.id() == id)
            .ok_or_else(|| PipelineError::StageNotFound(id.to_string()))
    }

    fn ensure_unique(&self, stage: &dyn Middleware) -> PipelineResult<()> {
        if self.contains(stage.id()) {
            return Err(PipelineError::DuplicateStage(stage.id().to_string()));
        }
        Ok(())
    }

    /// Appends a stage at the end.
    pub fn append(&mut self, stage: impl Middleware + 'static) -> PipelineResult<()> {
        self.append_arc(Arc::new(stage))
    }

    /// Appends a shared stage at the end.
    pub fn append_arc(&mut self, stage: Arc<dyn Middleware>) -> PipelineResult<()> {
        self.ensure_unique(stage.as_ref())?;
        self.stages.push(stage);
        Ok(())
    }

    /// Appends several stages in order. Nothing is added if any id clashes.
    pub fn append_all<I>(&mut self, stages: I) -> PipelineResult<()>
    where
        I: IntoIterator<Item = Arc<dyn Middleware>>,
    {
        let stages: Vec<_> = stages.into_iter().collect();
        for (i, stage) in stages.iter().enumerate() {
            self.ensure_unique(stage.as_ref())?;
            if stages[..i].iter().any(|other| other.id() == stage.id()) {
                return Err(PipelineError::DuplicateStage(stage.id().to_string()));
            }
        }
        self.stages.extend(stages);
        Ok(())
    }

    /// Appends a stage (builder pattern).
    pub fn with(mut self, stage: impl Middleware + 'static) -> PipelineResult<Self> {
        self.append(stage)?;
        Ok(self)
    }

    /// Inserts a stage right before the stage `id`.
    pub fn insert_before(&mut self, id: &str, stage: impl Middleware + 'static) -> PipelineResult<()> {
        self.insert_before_arc(id, Arc::new(stage))
    }

    /// Inserts a stage right after the stage `id`.
    pub fn insert_after(&mut self, id: &str, stage: impl Middleware + 'static) -> PipelineResult<()> {
        self.insert_after_arc(id, Arc::new(stage))
    }

    pub fn insert_before_arc(&mut self, id: &str, stage: Arc<dyn Middleware>) -> PipelineResult<()> {
        let index = self.position(id)?;
        self.ensure_unique(stage.as_ref())?;
        self.stages.insert(index, stage);
        Ok(())
    }

    pub fn insert_after_arc(&mut self, id: &str, stage: Arc<dyn Middleware>) -> PipelineResult<()> {
        let index = self.position(id)?;
        self.ensure_unique(stage.as_ref())?;
        self.stages.insert(index + 1, stage);
        Ok(())
    }

    /// Removes the stage `id`.
    pub fn remove(&mut self, id: &str) -> PipelineResult<Arc<dyn Middleware>> {
        let index = self.position(id)?;
        Ok(self.stages.remove(index))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.stages.iter().any(|stage| stage.id() == id)
    }

    /// Stage ids in run order.
    pub fn stage_ids(&self) -> Vec<&str> {
        self.stages.iter().map(|stage| stage.id()).collect()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Runs every stage on the message, in order.
    pub fn run(&self, message: &mut Message) -> PipelineResult<()> {
        if message.kind() != self.kind {
            return Err(PipelineError::KindMismatch {
                expected: self.kind,
                actual: message.kind(),
            });
        }

        let span = debug_span!(
            "pipeline",
            kind = %self.kind,
            message_id = %message.id(),
            content_type = message.content_type_name()
        );
        let _enter = span.enter();

        for stage in &self.stages {
            trace!(stage = stage.id(), status = %message.status(), "Running stage");
            stage.handle(message)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("kind", &self.kind)
            .field("stages", &self.stage_ids())
            .finish()
    }
}

// =============================================================================
// Pipeline Container
// =============================================================================

/// One pipeline per message kind.
#[derive(Debug, Clone)]
pub struct PipelineContainer {
    commands: Pipeline,
    queries: Pipeline,
    events: Pipeline,
}

impl PipelineContainer {
    /// Creates a container with three empty pipelines.
    pub fn new() -> Self {
        Self {
            commands: Pipeline::new(MessageKind::Command),
            queries: Pipeline::new(MessageKind::Query),
            events: Pipeline::new(MessageKind::Event),
        }
    }

    pub fn get(&self, kind: MessageKind) -> &Pipeline {
        match kind {
            MessageKind::Command => &self.commands,
            MessageKind::Query => &self.queries,
            MessageKind::Event => &self.events,
        }
    }

    pub fn get_mut(&mut self, kind: MessageKind) -> &mut Pipeline {
        match kind {
            MessageKind::Command => &mut self.commands,
            MessageKind::Query => &mut self.queries,
            MessageKind::Event => &mut self.events,
        }
    }

    /// Runs the message through the pipeline of its kind.
    pub fn run(&self, message: &mut Message) -> PipelineResult<()> {
        self.get(message.kind()).run(message)
    }
}

impl Default for PipelineContainer {
    fn default() -> Self {
        Self::new()
    }
}
