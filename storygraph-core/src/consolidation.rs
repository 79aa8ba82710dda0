//! Consolidation engine: compresses the pending chapter summaries into one
//! book summary.
//!
//! The text itself comes from the summarizer. This module only decides when
//! a window is full, which summaries it holds, and folds the result back in
//! one step so no chapter summary is consumed twice.

use crate::memory::{BookSummary, ChapterSummary, SemanticMemory};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// Errors applying a consolidation result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConsolidationError {
    #[error("nothing is pending consolidation")]
    NothingPending,

    #[error("summary covers chapters {covered:?} but the pending window holds {pending:?}")]
    StaleWindow { covered: Vec<u32>, pending: Vec<u32> },

    #[error("the consolidated summary is empty")]
    EmptySummary,
}

/// Input for the summarizer: the pending window, in chapter order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsolidationRequest {
    pub summaries: Vec<ChapterSummary>,
}

impl ConsolidationRequest {
    /// Chapters in the window.
    pub fn chapter_indices(&self) -> Vec<u32> {
        self.summaries.iter().map(|s| s.index).collect()
    }

    /// The summary strings, in order.
    pub fn texts(&self) -> impl Iterator<Item = &str> {
        self.summaries.iter().map(|s| s.summary.as_str())
    }
}

/// The summarizer's answer for a window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsolidationOutput {
    /// Chapters the text covers. Must equal the pending window.
    pub chapter_indices: Vec<u32>,
    pub text: String,
}

impl ConsolidationOutput {
    /// Pair a summary text with the window it was produced from.
    pub fn for_request(request: &ConsolidationRequest, text: impl Into<String>) -> Self {
        Self {
            chapter_indices: request.chapter_indices(),
            text: text.into(),
        }
    }
}

/// Stateless entry point of the consolidation engine.
pub struct ConsolidationEngine;

impl ConsolidationEngine {
    /// Whether the pending window has reached `threshold`.
    pub fn is_due(memory: &SemanticMemory, threshold: usize) -> bool {
        !memory.pending_summaries().is_empty() && memory.pending_summaries().len() >= threshold
    }

    /// The window to hand to the summarizer, if anything is pending.
    pub fn request(memory: &SemanticMemory) -> Option<ConsolidationRequest> {
        if memory.pending_summaries().is_empty() {
            return None;
        }
        Some(ConsolidationRequest {
            summaries: memory.pending_summaries().to_vec(),
        })
    }

    /// Append the book summary and clear the window it consumed.
    ///
    /// `memory` is not modified; the updated memory is returned.
    pub fn apply(
        memory: &SemanticMemory,
        output: ConsolidationOutput,
    ) -> Result<SemanticMemory, ConsolidationError> {
        let pending: Vec<u32> = memory.pending_summaries().iter().map(|s| s.index).collect();
        let (Some(&start), Some(&end)) = (pending.first(), pending.last()) else {
            return Err(ConsolidationError::NothingPending);
        };
        if output.chapter_indices != pending {
            return Err(ConsolidationError::StaleWindow {
                covered: output.chapter_indices,
                pending,
            });
        }
        let text = output.text.trim();
        if text.is_empty() {
            return Err(ConsolidationError::EmptySummary);
        }

        let mut next = memory.clone();
        Arc::make_mut(&mut next.book_summaries).push(BookSummary {
            start_chapter: start,
            end_chapter: end,
            chapter_indices: pending,
            text: text.to_string(),
        });
        next.chapter_summaries = Arc::default();

        info!(
            start_chapter = start,
            end_chapter = end,
            book_summaries = next.book_summaries.len(),
            "Consolidated chapter summaries"
        );
        Ok(next)
    }
}
