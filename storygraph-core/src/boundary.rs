//! Interfaces of the external collaborators.
//!
//! The engine never calls out on its own. The [`Pipeline`](crate::Pipeline)
//! drives these traits and feeds their results to the state manager.

use crate::chapters::ChapterMap;
use crate::consolidation::ConsolidationRequest;
use crate::context::ExtractionContext;
use crate::facts::FactBatch;
use crate::graph::{CharacterId, GraphStore};
use crate::report::ReportView;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure reported by a collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BoundaryError {
    #[error("{collaborator} timed out")]
    Timeout { collaborator: &'static str },

    #[error("{collaborator} failed, retryable: {message}")]
    Transient {
        collaborator: &'static str,
        message: String,
    },

    #[error("{collaborator} failed: {message}")]
    Fatal {
        collaborator: &'static str,
        message: String,
    },
}

impl BoundaryError {
    /// A failure worth retrying.
    pub fn transient(collaborator: &'static str, message: impl Into<String>) -> Self {
        BoundaryError::Transient {
            collaborator,
            message: message.into(),
        }
    }

    /// A failure that ends the run.
    pub fn fatal(collaborator: &'static str, message: impl Into<String>) -> Self {
        BoundaryError::Fatal {
            collaborator,
            message: message.into(),
        }
    }

    /// Whether the same request may succeed if repeated.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BoundaryError::Timeout { .. } | BoundaryError::Transient { .. })
    }
}

/// Importance of one character, as judged by the scorer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportanceScore {
    pub character: CharacterId,
    pub score: f32,
    #[serde(default)]
    pub reasoning: String,
}

/// Detects chapter boundaries in the raw text. Called once per book.
#[async_trait]
pub trait Segmenter: Send + Sync {
    async fn segment(&self, text: &str) -> Result<ChapterMap, BoundaryError>;
}

/// Turns one chapter into candidate facts.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(
        &self,
        context: &ExtractionContext,
        chapter_text: &str,
    ) -> Result<FactBatch, BoundaryError>;
}

/// Compresses a window of chapter summaries into one text.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, request: &ConsolidationRequest) -> Result<String, BoundaryError>;
}

/// Scores every character once the book is merged.
#[async_trait]
pub trait ImportanceScorer: Send + Sync {
    async fn score(&self, graph: &GraphStore) -> Result<Vec<ImportanceScore>, BoundaryError>;
}

/// Renders the finished graph. Returns where the report went, if anywhere.
#[async_trait]
pub trait ReportRenderer: Send + Sync {
    async fn render(&self, report: &ReportView<'_>) -> Result<Option<String>, BoundaryError>;
}
