//! Snapshot persistence for checkpoint and resume.
//!
//! A snapshot is saved as one versioned JSON document. Loading re-checks the
//! graph's internal indexes before handing the state back.

use crate::coordinator::Stage;
use crate::graph::GraphError;
use crate::memory::AgentState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;

/// Errors from persistence operations.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },

    #[error("Snapshot graph is inconsistent: {0}")]
    Corrupt(#[source] GraphError),
}

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// A saved snapshot with everything needed to resume processing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedSnapshot {
    /// Format version for compatibility checking.
    pub version: u32,

    pub saved_at: DateTime<Utc>,

    /// Quick-access summary of the state.
    pub metadata: SnapshotMetadata,

    /// The complete agent state.
    pub state: AgentState,
}

/// Metadata readable without deserializing the whole graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub book_title: String,
    pub stage: Stage,
    pub last_merged_chapter: Option<u32>,
    pub total_chapters: u32,
    pub characters: usize,
    pub relationships: usize,
    pub events: usize,
    pub steps: u64,
}

impl SnapshotMetadata {
    fn describe(state: &AgentState) -> Self {
        let graph = state.graph();
        Self {
            book_title: state.working.book_title.clone(),
            stage: state.stage(),
            last_merged_chapter: state.workflow.last_merged_chapter,
            total_chapters: state.workflow.total_chapters,
            characters: graph.character_count(),
            relationships: graph.relationship_count(),
            events: graph.event_count(),
            steps: state.workflow.steps,
        }
    }
}

impl SavedSnapshot {
    /// Wrap a state for saving.
    pub fn new(state: AgentState) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            saved_at: Utc::now(),
            metadata: SnapshotMetadata::describe(&state),
            state,
        }
    }

    /// Save to a JSON file.
    ///
    /// The document is written next to the target and renamed over it, so a
    /// crash mid-write leaves the previous checkpoint intact.
    pub async fn save_json(&self, path: impl AsRef<Path>) -> Result<(), PersistError> {
        let path = path.as_ref();
        let content = serde_json::to_string_pretty(self)?;
        let staging = staging_path(path);
        fs::write(&staging, content).await?;
        fs::rename(&staging, path).await?;
        Ok(())
    }

    /// Load from a JSON file.
    pub async fn load_json(path: impl AsRef<Path>) -> Result<Self, PersistError> {
        let content = fs::read_to_string(path).await?;
        Self::from_json_str(&content)
    }

    /// Parse a snapshot document and verify it.
    pub fn from_json_str(content: &str) -> Result<Self, PersistError> {
        let version = peek_version(content)?;
        check_version(version)?;

        let saved: Self = serde_json::from_str(content)?;
        saved.state.graph().check_invariants().map_err(PersistError::Corrupt)?;
        Ok(saved)
    }

    /// Read a snapshot's metadata without loading the full state.
    pub async fn peek_metadata(path: impl AsRef<Path>) -> Result<SnapshotMetadata, PersistError> {
        let content = fs::read_to_string(path).await?;

        #[derive(Deserialize)]
        struct Partial {
            version: u32,
            metadata: SnapshotMetadata,
        }

        let partial: Partial = serde_json::from_str(&content)?;
        check_version(partial.version)?;
        Ok(partial.metadata)
    }

    /// Unwrap the state.
    pub fn into_state(self) -> AgentState {
        self.state
    }
}

fn peek_version(content: &str) -> Result<u32, PersistError> {
    #[derive(Deserialize)]
    struct Version {
        version: u32,
    }
    Ok(serde_json::from_str::<Version>(content)?.version)
}

fn check_version(found: u32) -> Result<(), PersistError> {
    if found != SNAPSHOT_VERSION {
        return Err(PersistError::VersionMismatch {
            expected: SNAPSHOT_VERSION,
            found,
        });
    }
    Ok(())
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".partial");
    path.with_file_name(name)
}

/// Save a state in one call.
pub async fn save_state(state: &AgentState, path: impl AsRef<Path>) -> Result<(), PersistError> {
    SavedSnapshot::new(state.clone()).save_json(path).await
}

/// Load a state in one call.
pub async fn load_state(path: impl AsRef<Path>) -> Result<AgentState, PersistError> {
    Ok(SavedSnapshot::load_json(path).await?.into_state())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::graph::{InteractionId, RelationshipInteraction};
    use tempfile::TempDir;

    fn sample_state() -> AgentState {
        let mut state = AgentState::new("War and Peace", &EngineConfig::default());
        let graph = &mut state.semantic.graph;
        let pierre = graph.create_character("Pierre", 0).unwrap();
        graph.record_alias(pierre, "Count Bezukhov").unwrap();
        let andrei = graph.create_character("Andrei", 0).unwrap();
        graph
            .append_interaction(RelationshipInteraction {
                id: InteractionId::new(),
                character_a: pierre,
                character_b: andrei,
                relation_type: "Friends".into(),
                reasoning: "Old companions".into(),
                context: "They talk at the soiree".into(),
                evidence: crate::graph::RelationshipEvidence {
                    quote: "Pierre was glad to see his friend".into(),
                    chapter_index: 0,
                    chapter_title: "CHAPTER I".into(),
                },
                recorded_at: Utc::now(),
                is_causal_node: false,
                resolved_in_chapter: None,
                references_event: None,
                causal_reasoning: None,
            })
            .unwrap();
        state
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let path = temp_dir.path().join("snapshot.json");

        let state = sample_state();
        save_state(&state, &path).await.expect("Save should succeed");
        assert!(path.exists());
        assert!(!staging_path(&path).exists());

        let loaded = load_state(&path).await.expect("Load should succeed");
        assert_eq!(loaded, state);
        assert_eq!(loaded.graph().lookup_character("count bezukhov"), state.graph().lookup_character("Pierre"));
    }

    #[tokio::test]
    async fn test_peek_metadata() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let path = temp_dir.path().join("peek.json");

        save_state(&sample_state(), &path).await.expect("Save should succeed");
        let metadata = SavedSnapshot::peek_metadata(&path).await.expect("Peek should succeed");

        assert_eq!(metadata.book_title, "War and Peace");
        assert_eq!(metadata.characters, 2);
        assert_eq!(metadata.relationships, 1);
        assert_eq!(metadata.stage, Stage::Init);
    }

    #[test]
    fn test_version_mismatch() {
        let mut value = serde_json::to_value(SavedSnapshot::new(sample_state())).unwrap();
        value["version"] = serde_json::json!(99);

        let err = SavedSnapshot::from_json_str(&value.to_string()).unwrap_err();
        assert!(matches!(err, PersistError::VersionMismatch { expected: 1, found: 99 }));
    }

    #[test]
    fn test_corrupt_graph_rejected() {
        let mut value = serde_json::to_value(SavedSnapshot::new(sample_state())).unwrap();
        let aliases = value["state"]["semantic"]["graph"]["aliases"]
            .as_object_mut()
            .expect("aliases are a map");
        let andrei = aliases["andrei"].clone();
        aliases.insert("count bezukhov".into(), andrei);

        let err = SavedSnapshot::from_json_str(&value.to_string()).unwrap_err();
        assert!(matches!(err, PersistError::Corrupt(_)));
    }

    #[test]
    fn test_duplicate_character_rejected() {
        let mut value = serde_json::to_value(SavedSnapshot::new(sample_state())).unwrap();
        let characters = value["state"]["semantic"]["graph"]["characters"]
            .as_array_mut()
            .expect("characters are a list");
        let first = characters[0].clone();
        characters.push(first);

        let err = SavedSnapshot::from_json_str(&value.to_string()).unwrap_err();
        assert!(matches!(err, PersistError::Json(_)));
        assert!(err.to_string().contains("stored twice"));
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let err = load_state(temp_dir.path().join("absent.json")).await.unwrap_err();
        assert!(matches!(err, PersistError::Io(_)));
    }
}
