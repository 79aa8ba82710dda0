//! Incremental knowledge graph engine for long narrative texts.
//!
//! This crate provides:
//! - An append-only, copy-on-write character/relationship/event graph
//! - A merge engine that folds one chapter's facts into a new snapshot
//! - Hierarchical summary consolidation to bound memory growth
//! - A coordinator state machine that enforces strict chapter order
//! - Versioned snapshot persistence for checkpoint and resume
//!
//! Language understanding stays outside: segmentation, extraction,
//! summarization, scoring and rendering are traits in [`boundary`].
//!
//! # Quick Start
//!
//! ```ignore
//! use storygraph_core::{Collaborators, EngineConfig, Pipeline};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let text = std::fs::read_to_string("war_and_peace.txt")?;
//!     let collaborators = Collaborators {
//!         segmenter: Box::new(MySegmenter),
//!         extractor: Box::new(MyExtractor::from_env()?),
//!         summarizer: Box::new(MySummarizer::from_env()?),
//!         scorer: Box::new(MyScorer),
//!         renderer: Box::new(MyRenderer),
//!     };
//!
//!     let config = EngineConfig::new().with_checkpoints("war_and_peace.json", 25);
//!     let report = Pipeline::new(config, "War and Peace", text, collaborators)?
//!         .run()
//!         .await?;
//!     println!("{}", report.summary());
//!     Ok(())
//! }
//! ```

pub mod boundary;
pub mod chapters;
pub mod config;
pub mod consolidation;
pub mod context;
pub mod coordinator;
pub mod facts;
pub mod graph;
pub mod memory;
pub mod merge;
pub mod persist;
pub mod report;
pub mod session;
pub mod state_manager;
pub mod testing;

// Primary public API
pub use boundary::{
    BoundaryError, Extractor, ImportanceScore, ImportanceScorer, ReportRenderer, Segmenter,
    Summarizer,
};
pub use chapters::{ChapterBoundary, ChapterMap};
pub use config::{EngineConfig, MalformedBatchPolicy};
pub use coordinator::{Coordinator, Decision, Stage, WorkItem};
pub use facts::{FactBatch, ValidatedBatch};
pub use graph::{CharacterId, GraphStore};
pub use memory::AgentState;
pub use merge::{MergeEngine, MergeReport, MergeWarning};
pub use persist::{load_state, save_state, SavedSnapshot};
pub use report::ReportView;
pub use session::{Collaborators, Pipeline, RunError, RunFailure, RunReport};
pub use state_manager::{Outcome, StateManager};
pub use testing::{ScriptedExtractor, TestHarness};
