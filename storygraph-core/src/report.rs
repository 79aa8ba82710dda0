//! Read-only view over a published snapshot, for renderers and callers.

use crate::graph::{
    CharacterId, CharacterProfile, EventLink, RelationshipHistory, RelationshipInteraction,
    SignificantEvent,
};
use crate::memory::{AgentState, BookSummary, ChapterSummary};

/// Stable accessors over one snapshot.
#[derive(Debug, Clone, Copy)]
pub struct ReportView<'a> {
    state: &'a AgentState,
}

impl<'a> ReportView<'a> {
    /// View a snapshot.
    pub fn new(state: &'a AgentState) -> Self {
        Self { state }
    }

    /// Title of the book.
    pub fn book_title(&self) -> &'a str {
        &self.state.working.book_title
    }

    /// Number of chapters in the chapter map.
    pub fn chapter_count(&self) -> u32 {
        self.state.workflow.total_chapters
    }

    /// Number of chapters merged so far.
    pub fn chapters_processed(&self) -> u64 {
        self.state.usage.chapters_processed
    }

    /// Characters, most important first.
    pub fn characters(&self) -> Vec<&'a CharacterProfile> {
        self.state.graph().characters_by_importance()
    }

    /// One character by id.
    pub fn character(&self, id: CharacterId) -> Option<&'a CharacterProfile> {
        self.state.graph().character(id)
    }

    /// Every relationship history.
    pub fn relationships(&self) -> Vec<&'a RelationshipHistory> {
        self.state.graph().histories().collect()
    }

    /// Histories involving one character.
    pub fn relationships_of(&self, id: CharacterId) -> Vec<&'a RelationshipHistory> {
        self.state.graph().histories_of(id)
    }

    /// The history of a pair, from either direction.
    pub fn relationship(&self, a: CharacterId, b: CharacterId) -> Option<&'a RelationshipHistory> {
        self.state.graph().history(a, b)
    }

    /// Unresolved causal nodes.
    pub fn active_causal_nodes(&self) -> Vec<&'a RelationshipInteraction> {
        self.state.graph().active_causal_nodes()
    }

    /// The event chronicle, in recording order.
    pub fn events(&self) -> Vec<&'a SignificantEvent> {
        self.state.graph().events().collect()
    }

    /// Causal edges between events.
    pub fn event_links(&self) -> &'a [EventLink] {
        self.state.graph().event_links()
    }

    /// Consolidated summaries.
    pub fn book_summaries(&self) -> &'a [BookSummary] {
        self.state.semantic.book_summaries()
    }

    /// Chapter summaries not yet consolidated.
    pub fn chapter_summaries(&self) -> &'a [ChapterSummary] {
        self.state.semantic.pending_summaries()
    }

    /// Display name for a character id.
    pub fn name_of(&self, id: CharacterId) -> &'a str {
        self.character(id)
            .map(|c| c.canonical_name.as_str())
            .unwrap_or("unknown")
    }

    /// Plain text overview of the graph.
    pub fn overview(&self) -> String {
        let mut out = format!("=== {} ===\n", self.book_title());
        out.push_str(&format!(
            "Chapters: {}/{}\n",
            self.chapters_processed(),
            self.chapter_count()
        ));

        let characters = self.characters();
        if !characters.is_empty() {
            out.push_str("\nCharacters:\n");
            for character in &characters {
                out.push_str(&format!(
                    "  {} ({:.2}, from chapter {})\n",
                    character.canonical_name, character.importance, character.first_appearance_chapter
                ));
            }
        }

        let relationships = self.relationships();
        if !relationships.is_empty() {
            out.push_str("\nRelationships:\n");
            for history in relationships {
                let (a, b) = history.pair.endpoints();
                out.push_str(&format!(
                    "  {} & {}: {} ({} interactions)\n",
                    self.name_of(a),
                    self.name_of(b),
                    history.current_status().unwrap_or("none"),
                    history.len()
                ));
            }
        }

        let events = self.events();
        if !events.is_empty() {
            out.push_str(&format!("\nEvents: {}\n", events.len()));
        }
        out
    }
}
