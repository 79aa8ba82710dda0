//! Coordinator: the state machine that decides what happens next.
//!
//! The coordinator only reads a snapshot. It either asks for external work,
//! asks the state manager to move to another stage, or reports completion.
//! Chapter order is enforced here and re-checked by the state manager.

use crate::config::EngineConfig;
use crate::consolidation::{ConsolidationEngine, ConsolidationRequest};
use crate::memory::AgentState;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Stage tag of the workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Init,
    Segmented,
    LoadChapter,
    ExtractFacts,
    /// Entered and left inside a single state update.
    MergeFacts,
    CheckConsolidation,
    Consolidate,
    CheckCompletion,
    ScoreImportance,
    GenerateReport,
    Complete,
}

impl Stage {
    /// Stages reachable in one step.
    pub fn successors(self) -> &'static [Stage] {
        use Stage::*;
        match self {
            Init => &[Segmented],
            Segmented => &[LoadChapter, ScoreImportance],
            LoadChapter => &[ExtractFacts],
            ExtractFacts => &[MergeFacts],
            MergeFacts => &[CheckConsolidation],
            CheckConsolidation => &[Consolidate, CheckCompletion],
            Consolidate => &[CheckCompletion],
            CheckCompletion => &[LoadChapter, ScoreImportance],
            ScoreImportance => &[GenerateReport],
            GenerateReport => &[Complete],
            Complete => &[],
        }
    }

    /// Check if `to` is reachable in one step.
    pub fn can_advance_to(self, to: Stage) -> bool {
        self.successors().contains(&to)
    }

    /// Get the display name.
    pub fn name(self) -> &'static str {
        match self {
            Stage::Init => "init",
            Stage::Segmented => "segmented",
            Stage::LoadChapter => "load_chapter",
            Stage::ExtractFacts => "extract_facts",
            Stage::MergeFacts => "merge_facts",
            Stage::CheckConsolidation => "check_consolidation",
            Stage::Consolidate => "consolidate",
            Stage::CheckCompletion => "check_completion",
            Stage::ScoreImportance => "score_importance",
            Stage::GenerateReport => "generate_report",
            Stage::Complete => "complete",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Fatal state machine conditions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkflowError {
    #[error("workflow stalled after {steps} steps (limit {limit})")]
    Stalled { steps: u64, limit: u64 },

    #[error("no transition defined from {stage}: {reason}")]
    NoTransition { stage: Stage, reason: String },

    #[error("illegal transition {from} -> {to}")]
    IllegalTransition { from: Stage, to: Stage },

    #[error("chapter order violated: expected chapter {expected}, got {found}")]
    ChapterOrder { expected: u32, found: u32 },
}

/// External work the driver must perform.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkItem {
    /// Detect chapter boundaries in the source text.
    Segment,
    /// Cut a chapter out of the source text.
    LoadChapter { index: u32 },
    /// Ask the extractor for the loaded chapter's facts.
    Extract { index: u32 },
    /// Ask the summarizer to compress the pending window.
    Consolidate(ConsolidationRequest),
    /// Ask for character importance scores.
    ScoreImportance,
    /// Hand the finished graph to the renderer.
    GenerateReport,
}

impl WorkItem {
    /// Short label for logs.
    pub fn label(&self) -> &'static str {
        match self {
            WorkItem::Segment => "segment",
            WorkItem::LoadChapter { .. } => "load_chapter",
            WorkItem::Extract { .. } => "extract",
            WorkItem::Consolidate(_) => "consolidate",
            WorkItem::ScoreImportance => "score_importance",
            WorkItem::GenerateReport => "generate_report",
        }
    }
}

/// What the coordinator wants next.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Invoke(WorkItem),
    /// Internal routing, applied through the state manager.
    Advance { to: Stage, reason: String },
    Complete,
}

/// The workflow state machine.
#[derive(Debug, Clone)]
pub struct Coordinator {
    consolidation_threshold: usize,
    max_iterations: u64,
}

impl Coordinator {
    /// Create a coordinator from the engine configuration.
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            consolidation_threshold: config.consolidation_threshold,
            max_iterations: config.max_iterations,
        }
    }

    /// Decide the next action for a snapshot.
    pub fn next_action(&self, state: &AgentState) -> Result<Decision, WorkflowError> {
        let workflow = &state.workflow;
        if workflow.stage != Stage::Complete && workflow.steps >= self.max_iterations {
            return Err(WorkflowError::Stalled {
                steps: workflow.steps,
                limit: self.max_iterations,
            });
        }

        let stage = workflow.stage;
        let no_transition = |reason: &str| WorkflowError::NoTransition {
            stage,
            reason: reason.to_string(),
        };
        let current = || workflow.current_chapter.ok_or_else(|| no_transition("no current chapter"));

        let decision = match stage {
            Stage::Init => Decision::Invoke(WorkItem::Segment),
            Stage::Segmented if workflow.total_chapters == 0 => advance(Stage::ScoreImportance, "book has no chapters"),
            Stage::Segmented => advance(Stage::LoadChapter, "starting first chapter"),
            Stage::LoadChapter => Decision::Invoke(WorkItem::LoadChapter { index: current()? }),
            Stage::ExtractFacts => Decision::Invoke(WorkItem::Extract { index: current()? }),
            Stage::MergeFacts => return Err(no_transition("merge is applied with its extraction result")),
            Stage::CheckConsolidation => {
                if ConsolidationEngine::is_due(&state.semantic, self.consolidation_threshold) {
                    advance(Stage::Consolidate, "pending window is full")
                } else {
                    advance(Stage::CheckCompletion, "pending window not full")
                }
            }
            Stage::Consolidate => {
                let request = ConsolidationEngine::request(&state.semantic)
                    .ok_or_else(|| no_transition("nothing pending consolidation"))?;
                Decision::Invoke(WorkItem::Consolidate(request))
            }
            Stage::CheckCompletion => {
                let index = current()?;
                if index + 1 < workflow.total_chapters {
                    advance(Stage::LoadChapter, "next chapter")
                } else {
                    advance(Stage::ScoreImportance, "all chapters merged")
                }
            }
            Stage::ScoreImportance => Decision::Invoke(WorkItem::ScoreImportance),
            Stage::GenerateReport => Decision::Invoke(WorkItem::GenerateReport),
            Stage::Complete => Decision::Complete,
        };

        debug!(%stage, chapter = ?workflow.current_chapter, decision = %decision_kind(&decision), "Coordinator decision");
        Ok(decision)
    }
}

fn advance(to: Stage, reason: &str) -> Decision {
    Decision::Advance {
        to,
        reason: reason.to_string(),
    }
}

fn decision_kind(decision: &Decision) -> String {
    match decision {
        Decision::Invoke(item) => format!("invoke {}", item.label()),
        Decision::Advance { to, .. } => format!("advance to {to}"),
        Decision::Complete => "complete".to_string(),
    }
}
