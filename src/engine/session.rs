// src/engine/session.rs
//
// Per-page state: the current selection, the in-flight transform and the
// single live output.

use crate::engine::common::EngineResult;
use crate::engine::decoder::detect_format;
use crate::engine::intake::IntakePolicy;
use crate::engine::io::{OutputImage, SourceImage};
use crate::engine::tasks::PendingTransform;
use crate::error::ImageToolkitError;
use crate::ops::{OutputFormat, PageConfig, RequestOptions, TransformRequest};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Processing,
    Done,
    Failed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Processing => "processing",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

/// Identifies one invocation started by [`Session::start`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Ticket {
    generation: u64,
}

impl Ticket {
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// What [`Session::complete`] did with a result.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Completion {
    /// The result belonged to the latest invocation; the session is now in this state.
    Applied(SessionState),
    /// The result belonged to an older invocation and was dropped.
    Stale,
}

#[derive(Debug)]
pub struct Session {
    page: PageConfig,
    intake: IntakePolicy,
    selection: Option<SourceImage>,
    base_name: Option<String>,
    generation: u64,
    state: SessionState,
    pending: Option<PendingTransform>,
    output: Option<Arc<OutputImage>>,
    error_message: Option<String>,
}

impl Session {
    pub fn new(page: PageConfig) -> Self {
        Self {
            page,
            intake: IntakePolicy::default(),
            selection: None,
            base_name: None,
            generation: 0,
            state: SessionState::Idle,
            pending: None,
            output: None,
            error_message: None,
        }
    }

    pub fn with_intake(mut self, intake: IntakePolicy) -> Self {
        self.intake = intake;
        self
    }

    pub fn page(&self) -> &PageConfig {
        &self.page
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn selection(&self) -> Option<&SourceImage> {
        self.selection.as_ref()
    }

    pub fn base_name(&self) -> Option<&str> {
        self.base_name.as_deref()
    }

    pub fn set_base_name(&mut self, name: impl Into<String>) {
        self.base_name = Some(name.into());
    }

    /// The current output. Holding the returned `Arc` keeps it alive after the
    /// session has moved on.
    pub fn output(&self) -> Option<Arc<OutputImage>> {
        self.output.clone()
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Format of the selected file, sniffed from its bytes; the declared type
    /// is used only when the bytes are not recognized.
    pub fn source_format(&self) -> Option<OutputFormat> {
        let source = self.selection.as_ref()?;
        detect_format(source.bytes())
            .and_then(OutputFormat::from_image_format)
            .or_else(|| source.declared_format())
    }

    /// Formats to offer for the current selection.
    pub fn target_choices(&self) -> Vec<OutputFormat> {
        self.page.target_choices(self.source_format())
    }

    /// Replace the selection. A rejected selection leaves the previous one and
    /// its output in place but drops any in-flight transform.
    pub fn select(&mut self, files: Vec<SourceImage>) -> EngineResult<()> {
        let source = match self.intake.select(files) {
            Ok(source) => source,
            Err(err) => {
                self.reject(&err);
                return Err(err);
            }
        };

        self.cancel_pending();
        self.generation += 1;
        self.release_output();
        self.base_name = Some(source.base_name().to_string());
        debug!(
            filename = source.filename(),
            bytes = source.len(),
            page = self.page.kind.as_str(),
            "selection accepted"
        );
        self.selection = Some(source);
        self.error_message = None;
        self.state = SessionState::Idle;
        Ok(())
    }

    /// Build a request from page input and start it.
    pub fn submit(&mut self, options: &RequestOptions) -> EngineResult<Ticket> {
        let request = self
            .page
            .build_request(self.source_format(), options, self.base_name.as_deref())
            .inspect_err(|err| self.reject(err))?;
        self.start(request)
    }

    /// Start `request` against the current selection on the worker pool.
    pub fn start(&mut self, request: TransformRequest) -> EngineResult<Ticket> {
        let Some(source) = self.selection.clone() else {
            let err = ImageToolkitError::no_selection();
            self.reject(&err);
            return Err(err);
        };
        if let Err(err) = request.validate() {
            self.reject(&err);
            return Err(err);
        }

        self.cancel_pending();
        self.generation += 1;
        let ticket = Ticket {
            generation: self.generation,
        };
        debug!(
            generation = ticket.generation,
            operation = request.operation.name(),
            format = %request.format,
            "transform started"
        );
        self.pending = Some(PendingTransform::spawn(source, request, ticket.generation));
        self.error_message = None;
        self.state = SessionState::Processing;
        Ok(ticket)
    }

    /// Apply the in-flight result if it has finished.
    pub fn poll(&mut self) -> Option<Completion> {
        let pending = self.pending.as_mut()?;
        let result = pending.try_take()?;
        let ticket = Ticket {
            generation: pending.generation(),
        };
        self.pending = None;
        Some(self.complete(ticket, result))
    }

    /// Block until the in-flight transform finishes and apply its result.
    pub fn wait(&mut self) -> Option<Completion> {
        let pending = self.pending.take()?;
        let ticket = Ticket {
            generation: pending.generation(),
        };
        let result = pending.wait();
        Some(self.complete(ticket, result))
    }

    /// Apply a finished result. Results from older tickets are dropped.
    pub fn complete(&mut self, ticket: Ticket, result: EngineResult<OutputImage>) -> Completion {
        if ticket.generation != self.generation {
            debug!(
                ticket = ticket.generation,
                current = self.generation,
                "dropping stale result"
            );
            return Completion::Stale;
        }
        match result {
            Err(ImageToolkitError::Cancelled { .. }) => {
                debug!(generation = ticket.generation, "dropping cancelled result");
                Completion::Stale
            }
            Ok(output) => {
                info!(
                    filename = output.filename(),
                    bytes = output.len(),
                    "output ready"
                );
                self.release_output();
                self.output = Some(Arc::new(output));
                self.error_message = None;
                self.state = SessionState::Done;
                Completion::Applied(self.state)
            }
            Err(err) => {
                self.fail(&err);
                Completion::Applied(self.state)
            }
        }
    }

    /// Start `request` and wait for it on the calling thread.
    pub fn run(&mut self, request: TransformRequest) -> EngineResult<Arc<OutputImage>> {
        let ticket = self.start(request)?;
        let pending = self
            .pending
            .take()
            .ok_or_else(|| ImageToolkitError::internal_panic("transform was not started"))?;
        let result = pending.wait();
        let failure = result.as_ref().err().cloned();
        self.complete(ticket, result);
        match (failure, self.output.clone()) {
            (Some(err), _) => Err(err),
            (None, Some(output)) => Ok(output),
            (None, None) => Err(ImageToolkitError::internal_panic("output missing after transform")),
        }
    }

    fn cancel_pending(&mut self) {
        if let Some(pending) = self.pending.take() {
            debug!(generation = pending.generation(), "cancelling in-flight transform");
            pending.cancel();
        }
    }

    /// A rejected trigger still supersedes whatever was in flight.
    fn reject(&mut self, err: &ImageToolkitError) {
        self.cancel_pending();
        self.generation += 1;
        self.fail(err);
    }

    fn release_output(&mut self) {
        if let Some(previous) = self.output.take() {
            debug!(filename = previous.filename(), "releasing previous output");
        }
    }

    fn fail(&mut self, err: &ImageToolkitError) {
        let message = err.user_message(self.page.failure_message);
        warn!(
            category = err.category().as_str(),
            page = self.page.kind.as_str(),
            %message,
            "transform failed"
        );
        self.error_message = Some(message);
        self.state = SessionState::Failed;
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.cancel_pending();
    }
}
