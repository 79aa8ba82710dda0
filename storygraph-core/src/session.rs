//! Pipeline - the primary public API for processing a book.
//!
//! The pipeline owns the current snapshot and the external collaborators.
//! It asks the coordinator what to do, performs that work, and hands each
//! result to the state manager. Nothing else replaces the snapshot.

use crate::boundary::{
    BoundaryError, Extractor, ImportanceScorer, ReportRenderer, Segmenter, Summarizer,
};
use crate::chapters::ChapterMapError;
use crate::config::{ConfigError, EngineConfig, MalformedBatchPolicy};
use crate::consolidation::ConsolidationOutput;
use crate::context::ExtractionContext;
use crate::coordinator::{Coordinator, Decision, WorkItem, WorkflowError};
use crate::facts::MalformedFactBatch;
use crate::memory::AgentState;
use crate::merge::MergeWarning;
use crate::persist::{save_state, PersistError};
use crate::report::ReportView;
use crate::state_manager::{Outcome, StateError, StateManager};
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, info_span, warn, Instrument};

/// Errors that end a run.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Collaborator(#[from] BoundaryError),

    #[error("Extractor kept returning malformed batches: {0}")]
    MalformedBatch(#[from] MalformedFactBatch),

    #[error("Cannot load chapter text: {0}")]
    ChapterText(#[from] ChapterMapError),

    #[error("Checkpoint failed: {0}")]
    Persist(#[from] PersistError),
}

/// A failed run, with the last snapshot that was fully applied.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct RunFailure {
    #[source]
    pub error: RunError,
    pub last_state: Box<AgentState>,
}

/// The external services a run talks to.
pub struct Collaborators {
    pub segmenter: Box<dyn Segmenter>,
    pub extractor: Box<dyn Extractor>,
    pub summarizer: Box<dyn Summarizer>,
    pub scorer: Box<dyn ImportanceScorer>,
    pub renderer: Box<dyn ReportRenderer>,
}

/// Result of a completed run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub state: AgentState,
    /// State updates applied during this run.
    pub steps: u64,
    pub report_location: Option<String>,
    /// Every violation recovered along the way.
    pub warnings: Vec<MergeWarning>,
}

impl RunReport {
    /// Human readable one-paragraph summary.
    pub fn summary(&self) -> String {
        let graph = self.state.graph();
        let mut out = format!(
            "{}: {} chapters, {} characters, {} relationship pairs, {} events",
            self.state.working.book_title,
            self.state.usage.chapters_processed,
            graph.character_count(),
            graph.relationship_count(),
            graph.event_count()
        );
        out.push_str(&format!(
            "\n{} book summaries, {} steps, {} warnings",
            self.state.semantic.book_summaries().len(),
            self.steps,
            self.warnings.len()
        ));
        if let Some(location) = &self.report_location {
            out.push_str(&format!("\nReport: {location}"));
        }
        out
    }
}

/// Drives one book from its current stage to completion.
pub struct Pipeline {
    config: EngineConfig,
    coordinator: Coordinator,
    collaborators: Collaborators,
    source: Arc<str>,
    state: AgentState,
    warnings: Vec<MergeWarning>,
    steps_at_start: u64,
}

impl Pipeline {
    /// Start a fresh run over `source`.
    pub fn new(
        config: EngineConfig,
        book_title: impl Into<String>,
        source: impl Into<String>,
        collaborators: Collaborators,
    ) -> Result<Self, RunError> {
        let state = AgentState::new(book_title, &config);
        Self::resume(config, state, source, collaborators)
    }

    /// Continue from a saved snapshot. The source text must be the same
    /// document the snapshot was built from.
    pub fn resume(
        config: EngineConfig,
        state: AgentState,
        source: impl Into<String>,
        collaborators: Collaborators,
    ) -> Result<Self, RunError> {
        config.validate()?;
        Ok(Self {
            coordinator: Coordinator::new(&config),
            config,
            collaborators,
            source: Arc::from(source.into()),
            steps_at_start: state.workflow.steps,
            state,
            warnings: Vec::new(),
        })
    }

    /// The current snapshot.
    pub fn state(&self) -> &AgentState {
        &self.state
    }

    /// Run until the coordinator reports completion.
    pub async fn run(mut self) -> Result<RunReport, RunFailure> {
        let span = info_span!("pipeline", book = %self.state.working.book_title);
        match self.drive().instrument(span).await {
            Ok(()) => Ok(RunReport {
                steps: self.state.workflow.steps - self.steps_at_start,
                report_location: self.state.working.report_location.clone(),
                state: self.state,
                warnings: self.warnings,
            }),
            Err(error) => {
                warn!(%error, stage = %self.state.stage(), "Run failed");
                Err(RunFailure {
                    error,
                    last_state: Box::new(self.state),
                })
            }
        }
    }

    async fn drive(&mut self) -> Result<(), RunError> {
        info!(stage = %self.state.stage(), "Starting run");
        loop {
            let outcome = match self.coordinator.next_action(&self.state)? {
                Decision::Complete => break,
                Decision::Advance { to, reason } => Outcome::Advanced { to, reason },
                Decision::Invoke(item) => self.perform(item).await?,
            };
            self.commit(outcome).await?;
        }

        if let Some(path) = &self.config.checkpoint_path {
            save_state(&self.state, path).await?;
        }
        info!(
            chapters = self.state.usage.chapters_processed,
            characters = self.state.graph().character_count(),
            "Run complete"
        );
        Ok(())
    }

    async fn commit(&mut self, outcome: Outcome) -> Result<(), RunError> {
        let applied = StateManager::apply(&self.state, outcome)?;
        self.warnings.extend(applied.warnings);
        self.state = applied.state;

        if let (Some(path), Some(every)) = (&self.config.checkpoint_path, self.config.checkpoint_every) {
            if every > 0 && self.state.workflow.steps % u64::from(every) == 0 {
                debug!(step = self.state.workflow.steps, path = %path.display(), "Writing checkpoint");
                save_state(&self.state, path).await?;
            }
        }
        Ok(())
    }

    async fn perform(&self, item: WorkItem) -> Result<Outcome, RunError> {
        let retries = self.config.max_retries;
        let outcome = match item {
            WorkItem::Segment => {
                let segmenter = &*self.collaborators.segmenter;
                let source = &*self.source;
                let map = with_retries(retries, "segmenter", move || segmenter.segment(source)).await?;
                Outcome::Segmented(map)
            }
            WorkItem::LoadChapter { index } => {
                let text = self.state.chapters.slice(&self.source, index)?;
                let title = self
                    .state
                    .chapters
                    .get(index)
                    .map(|c| c.title.clone())
                    .unwrap_or_default();
                Outcome::ChapterLoaded { index, title, text }
            }
            WorkItem::Extract { index } => self.extract(index).await?,
            WorkItem::Consolidate(request) => {
                let summarizer = &*self.collaborators.summarizer;
                let req = &request;
                let text = with_retries(retries, "summarizer", move || summarizer.summarize(req)).await?;
                Outcome::Consolidated(ConsolidationOutput::for_request(&request, text))
            }
            WorkItem::ScoreImportance => {
                let scorer = &*self.collaborators.scorer;
                let graph = self.state.graph();
                let scores = with_retries(retries, "importance scorer", move || scorer.score(graph)).await?;
                Outcome::ImportanceScored(scores)
            }
            WorkItem::GenerateReport => {
                let renderer = &*self.collaborators.renderer;
                let view = ReportView::new(&self.state);
                let view = &view;
                let location = with_retries(retries, "renderer", move || renderer.render(view)).await?;
                Outcome::ReportGenerated { location }
            }
        };
        Ok(outcome)
    }

    async fn extract(&self, index: u32) -> Result<Outcome, RunError> {
        let chapter = self
            .state
            .chapters
            .get(index)
            .ok_or(ChapterMapError::UnknownChapter(index))?;
        let text: Arc<str> = match &self.state.working.current_chapter_text {
            Some(text) => Arc::clone(text),
            None => Arc::from(self.state.chapters.slice(&self.source, index)?),
        };
        let context = ExtractionContext::build(&self.state, chapter, &text);

        let extractor = &*self.collaborators.extractor;
        let mut attempts = 0;
        loop {
            let ctx = &context;
            let chapter_text = &*text;
            let batch = with_retries(self.config.max_retries, "extractor", move || {
                extractor.extract(ctx, chapter_text)
            })
            .await?;

            match batch.validate(&self.config) {
                Ok(valid) => return Ok(Outcome::Facts(valid)),
                Err(malformed) => {
                    let retry = self.config.malformed_batch_policy == MalformedBatchPolicy::Retry
                        && attempts < self.config.max_retries;
                    if !retry {
                        return Err(malformed.into());
                    }
                    attempts += 1;
                    warn!(chapter = index, attempt = attempts, %malformed, "Malformed fact batch, extracting again");
                }
            }
        }
    }
}

/// Call a collaborator, repeating retryable failures up to `max_retries` times.
async fn with_retries<T, F, Fut>(
    max_retries: u32,
    collaborator: &'static str,
    mut call: F,
) -> Result<T, BoundaryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, BoundaryError>>,
{
    let mut attempt = 0;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(error) if error.is_retryable() && attempt < max_retries => {
                attempt += 1;
                warn!(collaborator, attempt, %error, "Retrying collaborator call");
            }
            Err(error) => return Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_retries_transient_failures() {
        let mut calls = 0;
        let result = with_retries(2, "extractor", || {
            calls += 1;
            let attempt = calls;
            async move {
                if attempt < 3 {
                    Err(BoundaryError::transient("extractor", "busy"))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;
        assert_eq!(result, Ok(3));
    }

    #[tokio::test]
    async fn test_fatal_failure_not_retried() {
        let mut calls = 0;
        let result: Result<(), _> = with_retries(5, "summarizer", || {
            calls += 1;
            async { Err(BoundaryError::fatal("summarizer", "bad key")) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn test_retry_budget_exhausted() {
        let mut calls = 0;
        let result: Result<(), _> = with_retries(2, "scorer", || {
            calls += 1;
            async { Err(BoundaryError::Timeout { collaborator: "scorer" }) }
        })
        .await;
        assert_eq!(result, Err(BoundaryError::Timeout { collaborator: "scorer" }));
        assert_eq!(calls, 3);
    }
}
