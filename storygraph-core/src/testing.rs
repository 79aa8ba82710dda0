//! Testing utilities for the state engine.
//!
//! This module provides tools for integration testing:
//! - scripted collaborators for deterministic runs without external services
//! - `TestHarness` for building a book and running it end to end
//! - Assertion helpers for verifying graph state
//!
//! Every collaborator is cheap to clone and shares its script and call log
//! with its clones, so a test can keep a handle after boxing one into a
//! [`Pipeline`].

use crate::boundary::{
    BoundaryError, Extractor, ImportanceScore, ImportanceScorer, ReportRenderer, Segmenter,
    Summarizer,
};
use crate::chapters::{ChapterBoundary, ChapterMap};
use crate::config::EngineConfig;
use crate::consolidation::ConsolidationRequest;
use crate::context::ExtractionContext;
use crate::facts::FactBatch;
use crate::graph::GraphStore;
use crate::memory::AgentState;
use crate::report::ReportView;
use crate::session::{Collaborators, Pipeline, RunError, RunFailure, RunReport};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Builds a batch from the context the extractor was given.
pub type Responder = Arc<dyn Fn(&ExtractionContext) -> FactBatch + Send + Sync>;

enum Scripted {
    Batch(FactBatch),
    Respond(Responder),
    Fail(BoundaryError),
}

/// An extractor that returns scripted batches per chapter.
///
/// Chapters without a script get an empty batch with a one-line summary.
#[derive(Clone, Default)]
pub struct ScriptedExtractor {
    script: Arc<Mutex<HashMap<u32, VecDeque<Scripted>>>>,
    contexts: Arc<Mutex<Vec<ExtractionContext>>>,
}

impl ScriptedExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a batch for a chapter.
    pub async fn push(&self, batch: FactBatch) {
        let mut script = self.script.lock().await;
        script.entry(batch.chapter_index).or_default().push_back(Scripted::Batch(batch));
    }

    /// Queue a batch built from the chapter's extraction context.
    pub async fn respond_with<F>(&self, chapter: u32, responder: F)
    where
        F: Fn(&ExtractionContext) -> FactBatch + Send + Sync + 'static,
    {
        let mut script = self.script.lock().await;
        script
            .entry(chapter)
            .or_default()
            .push_back(Scripted::Respond(Arc::new(responder)));
    }

    /// Queue a failure for a chapter.
    pub async fn push_error(&self, chapter: u32, error: BoundaryError) {
        let mut script = self.script.lock().await;
        script.entry(chapter).or_default().push_back(Scripted::Fail(error));
    }

    /// Contexts seen so far, in call order.
    pub async fn contexts(&self) -> Vec<ExtractionContext> {
        self.contexts.lock().await.clone()
    }

    /// Number of extract calls.
    pub async fn calls(&self) -> usize {
        self.contexts.lock().await.len()
    }
}

#[async_trait]
impl Extractor for ScriptedExtractor {
    async fn extract(
        &self,
        context: &ExtractionContext,
        _chapter_text: &str,
    ) -> Result<FactBatch, BoundaryError> {
        self.contexts.lock().await.push(context.clone());
        let next = self
            .script
            .lock()
            .await
            .get_mut(&context.chapter_index)
            .and_then(VecDeque::pop_front);
        match next {
            Some(Scripted::Batch(batch)) => Ok(batch),
            Some(Scripted::Respond(responder)) => Ok(responder(context)),
            Some(Scripted::Fail(error)) => Err(error),
            None => Ok(FactBatch::new(
                context.chapter_index,
                context.chapter_title.clone(),
                format!("Nothing notable happens in {}.", context.chapter_title),
            )),
        }
    }
}

/// A summarizer that joins the window's summaries.
#[derive(Clone, Default)]
pub struct ScriptedSummarizer {
    failures: Arc<Mutex<VecDeque<BoundaryError>>>,
    requests: Arc<Mutex<Vec<ConsolidationRequest>>>,
}

impl ScriptedSummarizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next call with `error`.
    pub async fn fail_next(&self, error: BoundaryError) {
        self.failures.lock().await.push_back(error);
    }

    /// Requests seen so far.
    pub async fn requests(&self) -> Vec<ConsolidationRequest> {
        self.requests.lock().await.clone()
    }
}

#[async_trait]
impl Summarizer for ScriptedSummarizer {
    async fn summarize(&self, request: &ConsolidationRequest) -> Result<String, BoundaryError> {
        if let Some(error) = self.failures.lock().await.pop_front() {
            return Err(error);
        }
        self.requests.lock().await.push(request.clone());
        let indices = request.chapter_indices();
        Ok(format!(
            "Chapters {}-{}: {}",
            indices.first().copied().unwrap_or_default(),
            indices.last().copied().unwrap_or_default(),
            request.texts().collect::<Vec<_>>().join(" ")
        ))
    }
}

/// A segmenter that returns a fixed map, or splits on heading lines.
#[derive(Clone)]
pub struct StaticSegmenter {
    map: Option<ChapterMap>,
    heading: String,
}

impl StaticSegmenter {
    /// Always return `map`.
    pub fn new(map: ChapterMap) -> Self {
        Self {
            map: Some(map),
            heading: String::new(),
        }
    }

    /// Start a chapter at every line beginning with `heading`.
    pub fn headings(heading: impl Into<String>) -> Self {
        Self {
            map: None,
            heading: heading.into(),
        }
    }

    fn split(&self, text: &str) -> ChapterMap {
        let lines: Vec<&str> = text.lines().collect();
        let starts: Vec<usize> = lines
            .iter()
            .enumerate()
            .filter(|(_, line)| line.starts_with(&self.heading))
            .map(|(i, _)| i + 1)
            .collect();

        let chapters = starts
            .iter()
            .enumerate()
            .map(|(i, &start)| {
                let end = starts.get(i + 1).map_or(lines.len(), |next| next - 1);
                ChapterBoundary {
                    index: i as u32,
                    title: lines[start - 1].trim().to_string(),
                    book_index: 0,
                    book_title: String::new(),
                    chapter_number: i as u32 + 1,
                    start_line: start,
                    end_line: end,
                }
            })
            .collect();
        ChapterMap::new(chapters)
    }
}

#[async_trait]
impl Segmenter for StaticSegmenter {
    async fn segment(&self, text: &str) -> Result<ChapterMap, BoundaryError> {
        Ok(match &self.map {
            Some(map) => map.clone(),
            None => self.split(text),
        })
    }
}

/// Scores characters by canonical name. Unlisted characters get `default`.
#[derive(Clone, Default)]
pub struct FixedImportance {
    scores: BTreeMap<String, f32>,
    default: f32,
}

impl FixedImportance {
    pub fn new(default: f32) -> Self {
        Self {
            scores: BTreeMap::new(),
            default,
        }
    }

    /// Set the score for one name.
    pub fn with_score(mut self, name: impl Into<String>, score: f32) -> Self {
        self.scores.insert(name.into(), score);
        self
    }
}

#[async_trait]
impl ImportanceScorer for FixedImportance {
    async fn score(&self, graph: &GraphStore) -> Result<Vec<ImportanceScore>, BoundaryError> {
        Ok(graph
            .characters()
            .map(|c| ImportanceScore {
                character: c.id,
                score: self.scores.get(&c.canonical_name).copied().unwrap_or(self.default),
                reasoning: String::new(),
            })
            .collect())
    }
}

/// A renderer that keeps each overview it was asked to render.
#[derive(Clone, Default)]
pub struct RecordingRenderer {
    rendered: Arc<Mutex<Vec<String>>>,
}

impl RecordingRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overviews rendered so far.
    pub async fn rendered(&self) -> Vec<String> {
        self.rendered.lock().await.clone()
    }
}

#[async_trait]
impl ReportRenderer for RecordingRenderer {
    async fn render(&self, report: &ReportView<'_>) -> Result<Option<String>, BoundaryError> {
        let mut rendered = self.rendered.lock().await;
        rendered.push(report.overview());
        Ok(Some(format!("memory://report/{}", rendered.len())))
    }
}

/// Test harness for running a book through the full pipeline.
pub struct TestHarness {
    pub config: EngineConfig,
    pub book_title: String,
    pub extractor: ScriptedExtractor,
    pub summarizer: ScriptedSummarizer,
    pub importance: FixedImportance,
    pub renderer: RecordingRenderer,
    chapters: Vec<(String, String)>,
}

impl TestHarness {
    /// Create a harness for an empty book.
    pub fn new(book_title: impl Into<String>) -> Self {
        Self {
            config: EngineConfig::default(),
            book_title: book_title.into(),
            extractor: ScriptedExtractor::new(),
            summarizer: ScriptedSummarizer::new(),
            importance: FixedImportance::new(0.5),
            renderer: RecordingRenderer::new(),
            chapters: Vec::new(),
        }
    }

    /// Replace the engine configuration.
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Append a chapter. Its heading is `CHAPTER <n>`.
    pub fn chapter(&mut self, body: impl Into<String>) -> &mut Self {
        let title = format!("CHAPTER {}", self.chapters.len() + 1);
        self.chapters.push((title, body.into()));
        self
    }

    /// Append `count` chapters with filler text.
    pub fn chapters(&mut self, count: usize) -> &mut Self {
        for _ in 0..count {
            let n = self.chapters.len() + 1;
            self.chapter(format!("Filler text of chapter {n}."));
        }
        self
    }

    /// Title of a chapter by zero-based index.
    pub fn chapter_title(&self, index: u32) -> String {
        format!("CHAPTER {}", index + 1)
    }

    /// Script the extractor's answer for the batch's chapter.
    pub async fn facts(&self, batch: FactBatch) {
        self.extractor.push(batch).await;
    }

    /// The full source document.
    pub fn source(&self) -> String {
        let mut out = String::new();
        for (title, body) in &self.chapters {
            out.push_str(title);
            out.push('\n');
            out.push_str(body);
            out.push('\n');
        }
        out
    }

    fn collaborators(&self) -> Collaborators {
        Collaborators {
            segmenter: Box::new(StaticSegmenter::headings("CHAPTER ")),
            extractor: Box::new(self.extractor.clone()),
            summarizer: Box::new(self.summarizer.clone()),
            scorer: Box::new(self.importance.clone()),
            renderer: Box::new(self.renderer.clone()),
        }
    }

    /// Build a fresh pipeline over the harness book.
    pub fn pipeline(&self) -> Result<Pipeline, RunError> {
        Pipeline::new(
            self.config.clone(),
            self.book_title.clone(),
            self.source(),
            self.collaborators(),
        )
    }

    /// Build a pipeline that continues from `state`.
    pub fn resume(&self, state: AgentState) -> Result<Pipeline, RunError> {
        Pipeline::resume(self.config.clone(), state, self.source(), self.collaborators())
    }

    /// Run the whole book.
    pub async fn run(&self) -> Result<RunReport, RunFailure> {
        let pipeline = self.pipeline().map_err(|error| RunFailure {
            error,
            last_state: Box::new(AgentState::new(self.book_title.clone(), &self.config)),
        })?;
        pipeline.run().await
    }
}

// ============================================================================
// Assertion Helpers
// ============================================================================

/// Assert that the graph knows `name` as a name or alias.
#[track_caller]
pub fn assert_has_character(state: &AgentState, name: &str) {
    assert!(
        state.graph().lookup_character(name).is_some(),
        "Expected character '{name}' to exist in the graph"
    );
}

/// Assert that two names resolve to the same character.
#[track_caller]
pub fn assert_same_character(state: &AgentState, a: &str, b: &str) {
    let first = state.graph().lookup_character(a);
    let second = state.graph().lookup_character(b);
    assert!(
        first.is_some() && first == second,
        "Expected '{a}' and '{b}' to resolve to one character, got {first:?} and {second:?}"
    );
}

/// Assert the graph's internal indexes agree.
#[track_caller]
pub fn assert_consistent(state: &AgentState) {
    if let Err(e) = state.graph().check_invariants() {
        panic!("Graph is inconsistent: {e}");
    }
}
