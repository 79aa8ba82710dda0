//! State manager: the only producer of new snapshots.
//!
//! Takes the current snapshot and one typed outcome, checks that the outcome
//! fits the current stage and chapter, routes it to the merge or
//! consolidation engine, and returns the next snapshot. The input snapshot is
//! never modified; on error no new snapshot exists.

use crate::boundary::ImportanceScore;
use crate::chapters::{ChapterMap, ChapterMapError};
use crate::consolidation::{ConsolidationEngine, ConsolidationError, ConsolidationOutput};
use crate::coordinator::{Stage, WorkflowError};
use crate::facts::ValidatedBatch;
use crate::graph::{GraphError, Missing};
use crate::memory::{AgentState, ChapterSummary};
use crate::merge::{MergeEngine, MergeError, MergeReport, MergeWarning};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors from applying an outcome.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StateError {
    #[error("{outcome} outcome does not fit stage {stage}")]
    UnexpectedOutcome { stage: Stage, outcome: &'static str },

    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    #[error("invalid chapter map: {0}")]
    ChapterMap(#[from] ChapterMapError),

    #[error(transparent)]
    Merge(#[from] MergeError),

    #[error("consolidation failed: {0}")]
    Consolidation(#[from] ConsolidationError),

    #[error("importance scoring failed: {0}")]
    Graph(#[from] GraphError),
}

/// A typed result of one unit of work.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// Chapter boundaries of the whole book.
    Segmented(ChapterMap),
    /// Text of the current chapter.
    ChapterLoaded {
        index: u32,
        title: String,
        text: String,
    },
    /// Validated extractor output for the current chapter.
    Facts(ValidatedBatch),
    /// Summarizer output for the pending window.
    Consolidated(ConsolidationOutput),
    /// Importance scores for the finished graph.
    ImportanceScored(Vec<ImportanceScore>),
    /// The report was rendered.
    ReportGenerated { location: Option<String> },
    /// Internal routing decided by the coordinator.
    Advanced { to: Stage, reason: String },
}

impl Outcome {
    /// Short label for logs and errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Outcome::Segmented(_) => "segmented",
            Outcome::ChapterLoaded { .. } => "chapter_loaded",
            Outcome::Facts(_) => "facts",
            Outcome::Consolidated(_) => "consolidated",
            Outcome::ImportanceScored(_) => "importance_scored",
            Outcome::ReportGenerated { .. } => "report_generated",
            Outcome::Advanced { .. } => "advanced",
        }
    }

    fn accepted_in(&self, stage: Stage) -> bool {
        match self {
            Outcome::Segmented(_) => stage == Stage::Init,
            Outcome::ChapterLoaded { .. } => stage == Stage::LoadChapter,
            Outcome::Facts(_) => stage == Stage::ExtractFacts,
            Outcome::Consolidated(_) => stage == Stage::Consolidate,
            Outcome::ImportanceScored(_) => stage == Stage::ScoreImportance,
            Outcome::ReportGenerated { .. } => stage == Stage::GenerateReport,
            Outcome::Advanced { .. } => matches!(
                stage,
                Stage::Segmented | Stage::CheckConsolidation | Stage::CheckCompletion
            ),
        }
    }
}

/// The next snapshot plus what was recovered on the way.
#[derive(Debug, Clone)]
pub struct Applied {
    pub state: AgentState,
    pub warnings: Vec<MergeWarning>,
    /// Present when the outcome was a fact batch.
    pub merge: Option<MergeReport>,
}

/// Stateless dispatcher from outcomes to engine entry points.
pub struct StateManager;

impl StateManager {
    /// Apply one outcome to a snapshot.
    pub fn apply(state: &AgentState, outcome: Outcome) -> Result<Applied, StateError> {
        let stage = state.workflow.stage;
        if !outcome.accepted_in(stage) {
            return Err(StateError::UnexpectedOutcome {
                stage,
                outcome: outcome.kind(),
            });
        }

        let mut next = state.clone();
        let mut warnings = Vec::new();
        let mut merge = None;

        match outcome {
            Outcome::Segmented(map) => {
                map.validate()?;
                next.workflow.total_chapters = map.len() as u32;
                let reason = format!("{} chapters", map.len());
                next.chapters = Arc::new(map);
                next.workflow.record_transition(Stage::Segmented, reason);
            }
            Outcome::Advanced { to, reason } => advance(&mut next, to, reason)?,
            Outcome::ChapterLoaded { index, title, text } => {
                expect_current(&next, index)?;
                next.working.current_chapter_title = Some(title);
                next.working.current_chapter_text = Some(Arc::from(text));
                next.workflow.record_transition(Stage::ExtractFacts, "chapter loaded");
            }
            Outcome::Facts(batch) => {
                let report = merge_facts(&mut next, &batch)?;
                warnings = report.warnings.clone();
                merge = Some(report);
            }
            Outcome::Consolidated(output) => {
                next.semantic = ConsolidationEngine::apply(&next.semantic, output)?;
                next.workflow.chapters_since_consolidation = 0;
                next.usage.summarizer_calls += 1;
                next.workflow.record_transition(Stage::CheckCompletion, "window consolidated");
            }
            Outcome::ImportanceScored(scores) => {
                for score in scores {
                    match next.semantic.graph.set_importance(score.character, score.score) {
                        Ok(()) => {}
                        Err(GraphError::NotFound(Missing::Character(id))) => {
                            warn!(character = %id, "Importance score for unknown character");
                            warnings.push(MergeWarning::UnknownCharacter(id));
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
                next.usage.scoring_calls += 1;
                next.workflow.record_transition(Stage::GenerateReport, "importance scored");
            }
            Outcome::ReportGenerated { location } => {
                next.working.report_location = location;
                next.workflow.record_transition(Stage::Complete, "report generated");
                info!(book = %next.working.book_title, "Processing complete");
            }
        }

        next.workflow.steps += 1;
        next.usage.state_updates += 1;
        debug!(from = %stage, to = %next.workflow.stage, step = next.workflow.steps, "Applied outcome");
        Ok(Applied {
            state: next,
            warnings,
            merge,
        })
    }
}

fn advance(next: &mut AgentState, to: Stage, reason: String) -> Result<(), StateError> {
    let from = next.workflow.stage;
    if !from.can_advance_to(to) {
        return Err(WorkflowError::IllegalTransition { from, to }.into());
    }

    if to == Stage::LoadChapter {
        let index = next.workflow.current_chapter.map_or(0, |c| c + 1);
        if index >= next.workflow.total_chapters {
            return Err(WorkflowError::NoTransition {
                stage: from,
                reason: format!("chapter {index} is past the end of the book"),
            }
            .into());
        }
        let expected = next.workflow.next_expected_chapter();
        if index != expected {
            return Err(WorkflowError::ChapterOrder {
                expected,
                found: index,
            }
            .into());
        }
        next.workflow.current_chapter = Some(index);
        next.working.current_chapter_title = next.chapters.get(index).map(|c| c.title.clone());
        next.working.current_chapter_text = None;
    }

    next.workflow.record_transition(to, reason);
    Ok(())
}

fn expect_current(state: &AgentState, index: u32) -> Result<(), StateError> {
    let current = state.workflow.current_chapter.ok_or_else(|| WorkflowError::NoTransition {
        stage: state.workflow.stage,
        reason: "no current chapter".to_string(),
    })?;
    if index != current {
        return Err(WorkflowError::ChapterOrder {
            expected: current,
            found: index,
        }
        .into());
    }
    Ok(())
}

fn merge_facts(next: &mut AgentState, batch: &ValidatedBatch) -> Result<MergeReport, StateError> {
    let index = batch.chapter_index;
    expect_current(next, index)?;
    let expected = next.workflow.next_expected_chapter();
    if index != expected {
        return Err(WorkflowError::ChapterOrder {
            expected,
            found: index,
        }
        .into());
    }

    let output = MergeEngine::merge(next.graph(), batch)?;
    next.workflow.record_transition(Stage::MergeFacts, "facts extracted");
    next.semantic.graph = output.graph;
    let report = output.report;

    let introduced = report
        .characters_created
        .iter()
        .filter_map(|id| next.semantic.graph.character(*id))
        .map(|c| c.canonical_name.clone())
        .collect();
    let recorded = next.semantic.record_chapter_summary(ChapterSummary {
        index,
        title: batch.chapter_title.clone(),
        summary: batch.summary.trim().to_string(),
        characters_introduced: introduced,
        events_count: report.events_added.len() + report.events_skipped,
        relationships_count: report.interactions_added.len() + report.interactions_skipped,
    });
    if recorded {
        next.workflow.chapters_since_consolidation += 1;
    }

    next.episodic.record(index);
    next.working.current_chapter_text = None;
    next.workflow.last_merged_chapter = Some(index);
    next.usage.chapters_processed += 1;
    next.usage.extractor_calls += 1;
    next.workflow.record_transition(Stage::CheckConsolidation, "facts merged");

    info!(
        chapter = index,
        title = %batch.chapter_title,
        characters = next.graph().character_count(),
        warnings = report.warnings.len(),
        "Chapter merged"
    );
    Ok(report)
}
