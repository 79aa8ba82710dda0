//! The agent state snapshot and its memory tiers.
//!
//! Implements a hybrid approach: long-lived semantic memory (the graph plus
//! consolidated summaries) and a sliding window of recent chapters.
//!
//! Every field that grows with the book is held behind `Arc`, so producing
//! the next snapshot from the current one only copies what changes.

use crate::chapters::ChapterMap;
use crate::config::EngineConfig;
use crate::coordinator::Stage;
use crate::graph::GraphStore;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;

/// Fine-grained summary of one chapter, pending consolidation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChapterSummary {
    pub index: u32,
    pub title: String,
    pub summary: String,
    /// Canonical names of characters first seen in this chapter.
    #[serde(default)]
    pub characters_introduced: Vec<String>,
    #[serde(default)]
    pub events_count: usize,
    #[serde(default)]
    pub relationships_count: usize,
}

/// Coarse summary covering a run of consecutive chapters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookSummary {
    pub start_chapter: u32,
    pub end_chapter: u32,
    /// Every chapter whose summary was folded into this one.
    pub chapter_indices: Vec<u32>,
    pub text: String,
}

impl BookSummary {
    /// Check if a chapter is covered.
    pub fn covers(&self, index: u32) -> bool {
        self.chapter_indices.contains(&index)
    }
}

/// Long-lived knowledge: the graph and the summary tiers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SemanticMemory {
    pub(crate) graph: GraphStore,
    #[serde(default)]
    pub(crate) book_summaries: Arc<Vec<BookSummary>>,
    /// Chapter summaries not yet consolidated, in chapter order.
    #[serde(default)]
    pub(crate) chapter_summaries: Arc<Vec<ChapterSummary>>,
}

impl SemanticMemory {
    /// The knowledge graph.
    pub fn graph(&self) -> &GraphStore {
        &self.graph
    }

    /// Consolidated summaries, oldest first.
    pub fn book_summaries(&self) -> &[BookSummary] {
        &self.book_summaries
    }

    /// Summaries awaiting consolidation.
    pub fn pending_summaries(&self) -> &[ChapterSummary] {
        &self.chapter_summaries
    }

    /// Whether a chapter already has a summary in either tier.
    pub fn has_summary(&self, index: u32) -> bool {
        self.chapter_summaries.iter().any(|s| s.index == index)
            || self.book_summaries.iter().any(|b| b.covers(index))
    }

    /// Queue a chapter summary. Returns false if the chapter already has one.
    pub(crate) fn record_chapter_summary(&mut self, summary: ChapterSummary) -> bool {
        if self.has_summary(summary.index) {
            return false;
        }
        Arc::make_mut(&mut self.chapter_summaries).push(summary);
        true
    }
}

/// Sliding window of the most recent chapters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpisodicMemory {
    window: usize,
    recent_chapters: VecDeque<u32>,
}

impl EpisodicMemory {
    /// Create an empty window of the given size.
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            recent_chapters: VecDeque::new(),
        }
    }

    /// Remember a chapter, evicting the oldest when the window overflows.
    pub(crate) fn record(&mut self, index: u32) {
        if self.recent_chapters.contains(&index) {
            return;
        }
        self.recent_chapters.push_back(index);
        self.trim();
    }

    fn trim(&mut self) {
        while self.recent_chapters.len() > self.window {
            self.recent_chapters.pop_front();
        }
    }

    /// Chapters currently held, oldest first.
    pub fn recent_chapters(&self) -> impl Iterator<Item = u32> + '_ {
        self.recent_chapters.iter().copied()
    }

    /// Check if a chapter is still in the window.
    pub fn contains(&self, index: u32) -> bool {
        self.recent_chapters.contains(&index)
    }

    /// Number of chapters held.
    pub fn len(&self) -> usize {
        self.recent_chapters.len()
    }

    /// Whether the window is empty.
    pub fn is_empty(&self) -> bool {
        self.recent_chapters.is_empty()
    }

    /// Configured window size.
    pub fn window(&self) -> usize {
        self.window
    }
}

/// Scratch space for the chapter in flight.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkingMemory {
    pub book_title: String,
    #[serde(default)]
    pub current_chapter_title: Option<String>,
    /// Text of the loaded chapter, cleared once it is merged.
    #[serde(default)]
    pub current_chapter_text: Option<Arc<str>>,
    /// Where the renderer put the report, if it said.
    #[serde(default)]
    pub report_location: Option<String>,
}

/// One recorded stage change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub step: u64,
    pub from: Stage,
    pub to: Stage,
    pub chapter: Option<u32>,
    pub reason: String,
}

/// Where the coordinator is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowState {
    pub stage: Stage,
    /// Chapter being processed.
    pub current_chapter: Option<u32>,
    pub total_chapters: u32,
    pub chapters_since_consolidation: u32,
    /// Last chapter whose facts were merged.
    pub last_merged_chapter: Option<u32>,
    /// State updates applied so far.
    pub steps: u64,
    #[serde(default)]
    pub transitions: Arc<Vec<TransitionRecord>>,
}

impl Default for WorkflowState {
    fn default() -> Self {
        Self {
            stage: Stage::Init,
            current_chapter: None,
            total_chapters: 0,
            chapters_since_consolidation: 0,
            last_merged_chapter: None,
            steps: 0,
            transitions: Arc::default(),
        }
    }
}

impl WorkflowState {
    /// The chapter the next merge must carry.
    pub fn next_expected_chapter(&self) -> u32 {
        self.last_merged_chapter.map_or(0, |c| c + 1)
    }

    pub(crate) fn record_transition(&mut self, to: Stage, reason: impl Into<String>) {
        let record = TransitionRecord {
            step: self.steps,
            from: self.stage,
            to,
            chapter: self.current_chapter,
            reason: reason.into(),
        };
        Arc::make_mut(&mut self.transitions).push(record);
        self.stage = to;
    }
}

/// Work done so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub chapters_processed: u64,
    pub extractor_calls: u64,
    pub summarizer_calls: u64,
    pub scoring_calls: u64,
    pub state_updates: u64,
}

/// The root snapshot. Owns every memory tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    pub semantic: SemanticMemory,
    pub episodic: EpisodicMemory,
    pub working: WorkingMemory,
    pub workflow: WorkflowState,
    #[serde(default)]
    pub chapters: Arc<ChapterMap>,
    #[serde(default)]
    pub usage: ResourceUsage,
}

impl AgentState {
    /// Fresh state for a book, before segmentation.
    pub fn new(book_title: impl Into<String>, config: &EngineConfig) -> Self {
        Self {
            semantic: SemanticMemory::default(),
            episodic: EpisodicMemory::new(config.episodic_window),
            working: WorkingMemory {
                book_title: book_title.into(),
                ..Default::default()
            },
            workflow: WorkflowState::default(),
            chapters: Arc::default(),
            usage: ResourceUsage::default(),
        }
    }

    /// The knowledge graph.
    pub fn graph(&self) -> &GraphStore {
        &self.semantic.graph
    }

    /// Current stage.
    pub fn stage(&self) -> Stage {
        self.workflow.stage
    }

    /// Whether processing finished.
    pub fn is_complete(&self) -> bool {
        self.workflow.stage == Stage::Complete
    }
}
