//! Working context handed to the extractor for one chapter.
//!
//! Only the relevant slice of semantic memory goes in: characters mentioned
//! in the chapter, open causal nodes, and recent relationship activity.

use crate::chapters::ChapterBoundary;
use crate::graph::{CharacterProfile, EventId, RelationshipInteraction, SignificantEvent};
use crate::memory::{AgentState, BookSummary, ChapterSummary};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt::Write;

/// Graph context for the extractor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionContext {
    pub book_title: String,
    pub chapter_index: u32,
    pub chapter_title: String,
    /// Characters named in the chapter text.
    pub relevant_profiles: Vec<CharacterProfile>,
    /// Every unresolved causal node.
    pub active_causal_nodes: Vec<RelationshipInteraction>,
    /// Interactions from the episodic window, oldest first.
    pub recent_interactions: Vec<RelationshipInteraction>,
    /// Events a causal link may point at: the episodic window, events
    /// referenced by open nodes, and events from the chapters of open nodes.
    pub recent_events: Vec<SignificantEvent>,
    pub book_summaries: Vec<BookSummary>,
    pub pending_summaries: Vec<ChapterSummary>,
}

impl ExtractionContext {
    /// Collect the context for `chapter` from a snapshot.
    pub fn build(state: &AgentState, chapter: &ChapterBoundary, text: &str) -> Self {
        let graph = state.graph();

        let relevant_profiles = graph
            .extract_mentioned_characters(text)
            .into_iter()
            .filter_map(|id| graph.character(id).cloned())
            .collect();

        let active: Vec<&RelationshipInteraction> = graph.active_causal_nodes();
        let active_ids: BTreeSet<_> = active.iter().map(|i| i.id).collect();

        let mut recent_interactions: Vec<RelationshipInteraction> = graph
            .histories()
            .flat_map(|h| h.interactions())
            .filter(|i| state.episodic.contains(i.chapter()) && !active_ids.contains(&i.id))
            .cloned()
            .collect();
        recent_interactions.sort_by_key(|i| i.chapter());

        let referenced: BTreeSet<EventId> = active.iter().filter_map(|i| i.references_event).collect();
        let open_chapters: BTreeSet<u32> = active.iter().map(|i| i.chapter()).collect();
        let recent_events = graph
            .events()
            .filter(|e| {
                state.episodic.contains(e.chapter_index)
                    || referenced.contains(&e.id)
                    || open_chapters.contains(&e.chapter_index)
            })
            .cloned()
            .collect();

        Self {
            book_title: state.working.book_title.clone(),
            chapter_index: chapter.index,
            chapter_title: chapter.title.clone(),
            relevant_profiles,
            active_causal_nodes: active.into_iter().cloned().collect(),
            recent_interactions,
            recent_events,
            book_summaries: state.semantic.book_summaries().to_vec(),
            pending_summaries: state.semantic.pending_summaries().to_vec(),
        }
    }

    /// Render the context as markdown sections for a prompt.
    pub fn to_prompt_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# {} / {}\n", self.book_title, self.chapter_title);

        if !self.book_summaries.is_empty() || !self.pending_summaries.is_empty() {
            out.push_str("## Story So Far\n");
            for book in &self.book_summaries {
                let _ = writeln!(out, "- Chapters {}-{}: {}", book.start_chapter, book.end_chapter, book.text);
            }
            for summary in &self.pending_summaries {
                let _ = writeln!(out, "- {}: {}", summary.title, summary.summary);
            }
            out.push('\n');
        }

        if !self.relevant_profiles.is_empty() {
            out.push_str("## Known Characters\n");
            for profile in &self.relevant_profiles {
                let _ = write!(out, "- {} [{}]", profile.canonical_name, profile.id);
                if !profile.aliases.is_empty() {
                    let _ = write!(out, " (also: {})", profile.aliases.join(", "));
                }
                if let Some(summary) = &profile.evolution_summary {
                    let _ = write!(out, ": {summary}");
                }
                out.push('\n');
            }
            out.push('\n');
        }

        if !self.active_causal_nodes.is_empty() {
            out.push_str("## Open Causal Nodes\n");
            for node in &self.active_causal_nodes {
                let _ = writeln!(
                    out,
                    "- [{}] chapter {}: {} ({})",
                    node.id,
                    node.chapter(),
                    node.relation_type,
                    node.context
                );
            }
            out.push('\n');
        }

        if !self.recent_events.is_empty() {
            out.push_str("## Recent Events\n");
            for event in &self.recent_events {
                let _ = writeln!(
                    out,
                    "- [{}] chapter {} ({}): {}",
                    event.id,
                    event.chapter_index,
                    event.significance.name(),
                    event.description
                );
            }
        }

        out
    }
}
