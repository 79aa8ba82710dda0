//! The graph store: characters, relationship histories and the event chronicle.
//!
//! Collections are held behind `Arc`, so cloning a store is cheap and a clone
//! only copies the parts that are later written to. A published snapshot is
//! therefore never observed changing.

use super::character::{normalize_alias, CharacterId, CharacterProfile, DossierPatch};
use super::event::{EventId, EventLink, SignificantEvent};
use super::relationship::{InteractionId, PairKey, RelationshipHistory, RelationshipInteraction};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use thiserror::Error;

/// Something a store operation expected to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Missing {
    Character(CharacterId),
    Interaction(InteractionId),
    OpenCausalNode(InteractionId),
    Event(EventId),
}

impl std::fmt::Display for Missing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Missing::Character(id) => write!(f, "character {id}"),
            Missing::Interaction(id) => write!(f, "interaction {id}"),
            Missing::OpenCausalNode(id) => write!(f, "open causal node {id}"),
            Missing::Event(id) => write!(f, "event {id}"),
        }
    }
}

/// Errors raised by graph store operations.
///
/// A failed operation leaves the store untouched.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GraphError {
    #[error("alias '{alias}' is already bound to character {existing}")]
    AliasConflict { alias: String, existing: CharacterId },

    #[error("interaction from chapter {chapter} is older than the history tail (chapter {tail})")]
    OutOfOrderInteraction { chapter: u32, tail: u32 },

    #[error("{0} not found")]
    NotFound(Missing),

    #[error("character {0} cannot have a relationship with itself")]
    SelfInteraction(CharacterId),

    #[error("names and aliases must not be empty")]
    EmptyName,

    #[error("identifier {0} is already in use")]
    DuplicateId(String),

    #[error("interaction {interaction} already descends from event {existing}")]
    CausalReferenceTaken {
        interaction: InteractionId,
        existing: EventId,
    },

    #[error("corrupt graph: {0}")]
    Corrupt(String),
}

/// The knowledge graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "GraphStoreRepr", into = "GraphStoreRepr")]
pub struct GraphStore {
    /// Profiles by id.
    profiles: Arc<BTreeMap<CharacterId, Arc<CharacterProfile>>>,
    /// Normalized name or alias to id. Canonical names are indexed too.
    alias_index: Arc<BTreeMap<String, CharacterId>>,
    /// One shared history per unordered pair.
    histories: Arc<BTreeMap<PairKey, Arc<RelationshipHistory>>>,
    /// Adjacency, both directions. Derived.
    partners: Arc<BTreeMap<CharacterId, BTreeSet<CharacterId>>>,
    /// Interaction id to the history holding it. Derived.
    interaction_index: Arc<BTreeMap<InteractionId, PairKey>>,
    /// Chronicle in recording order.
    events: Arc<Vec<Arc<SignificantEvent>>>,
    /// Event id to chronicle position. Derived.
    event_index: Arc<BTreeMap<EventId, usize>>,
    /// Causal edges between events.
    event_links: Arc<Vec<EventLink>>,
}

impl GraphStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // Characters
    // =========================================================================

    /// Resolve a name or alias (case-insensitive) to a character id.
    pub fn lookup_character(&self, alias: &str) -> Option<CharacterId> {
        self.alias_index.get(&normalize_alias(alias)).copied()
    }

    /// Create a new character first seen in `first_chapter`.
    ///
    /// Fails with `AliasConflict` if the name is already bound; callers look
    /// the name up first.
    pub fn create_character(
        &mut self,
        name: &str,
        first_chapter: u32,
    ) -> Result<CharacterId, GraphError> {
        self.insert_profile(CharacterProfile::new(name.trim(), first_chapter))
    }

    /// Insert a fully built profile, indexing its canonical name and aliases.
    pub fn insert_profile(&mut self, profile: CharacterProfile) -> Result<CharacterId, GraphError> {
        if profile.canonical_name.trim().is_empty() {
            return Err(GraphError::EmptyName);
        }
        if self.profiles.contains_key(&profile.id) {
            return Err(GraphError::DuplicateId(profile.id.to_string()));
        }
        let mut keys = Vec::new();
        for name in profile.names() {
            let key = normalize_alias(name);
            if key.is_empty() {
                return Err(GraphError::EmptyName);
            }
            if let Some(&existing) = self.alias_index.get(&key) {
                return Err(GraphError::AliasConflict {
                    alias: name.to_string(),
                    existing,
                });
            }
            keys.push(key);
        }

        let id = profile.id;
        let index = Arc::make_mut(&mut self.alias_index);
        for key in keys {
            index.insert(key, id);
        }
        Arc::make_mut(&mut self.profiles).insert(id, Arc::new(profile));
        Ok(id)
    }

    /// Bind an alias to a character.
    ///
    /// Returns `Ok(false)` when the alias is already bound to this character.
    pub fn record_alias(&mut self, id: CharacterId, alias: &str) -> Result<bool, GraphError> {
        let key = normalize_alias(alias);
        if key.is_empty() {
            return Err(GraphError::EmptyName);
        }
        if !self.profiles.contains_key(&id) {
            return Err(GraphError::NotFound(Missing::Character(id)));
        }
        match self.alias_index.get(&key) {
            Some(&existing) if existing == id => return Ok(false),
            Some(&existing) => {
                return Err(GraphError::AliasConflict {
                    alias: alias.trim().to_string(),
                    existing,
                })
            }
            None => {}
        }

        Arc::make_mut(&mut self.alias_index).insert(key, id);
        if let Some(profile) = Arc::make_mut(&mut self.profiles).get_mut(&id) {
            Arc::make_mut(profile).push_alias(alias);
        }
        Ok(true)
    }

    /// Fold a dossier update into a character's profile.
    pub fn apply_dossier(&mut self, id: CharacterId, patch: &DossierPatch) -> Result<(), GraphError> {
        let profile = self.profile_mut(id)?;
        profile.apply_dossier(patch);
        Ok(())
    }

    /// Set a character's importance, clamped into [0, 1].
    pub fn set_importance(&mut self, id: CharacterId, score: f32) -> Result<(), GraphError> {
        let score = if score.is_nan() { 0.0 } else { score.clamp(0.0, 1.0) };
        self.profile_mut(id)?.importance = score;
        Ok(())
    }

    fn profile_mut(&mut self, id: CharacterId) -> Result<&mut CharacterProfile, GraphError> {
        Arc::make_mut(&mut self.profiles)
            .get_mut(&id)
            .map(Arc::make_mut)
            .ok_or(GraphError::NotFound(Missing::Character(id)))
    }

    /// Get a character by id.
    pub fn character(&self, id: CharacterId) -> Option<&CharacterProfile> {
        self.profiles.get(&id).map(|p| p.as_ref())
    }

    /// Find a character by any of its names.
    pub fn character_by_name(&self, name: &str) -> Option<&CharacterProfile> {
        self.lookup_character(name).and_then(|id| self.character(id))
    }

    /// All characters, ordered by id.
    pub fn characters(&self) -> impl Iterator<Item = &CharacterProfile> {
        self.profiles.values().map(|p| p.as_ref())
    }

    /// All characters, most important first. Ties keep first appearance order.
    pub fn characters_by_importance(&self) -> Vec<&CharacterProfile> {
        let mut characters: Vec<_> = self.characters().collect();
        characters.sort_by(|a, b| {
            b.importance
                .partial_cmp(&a.importance)
                .unwrap_or(Ordering::Equal)
                .then(a.first_appearance_chapter.cmp(&b.first_appearance_chapter))
                .then_with(|| a.canonical_name.cmp(&b.canonical_name))
        });
        characters
    }

    // =========================================================================
    // Relationships
    // =========================================================================

    /// Append an interaction to its pair's shared history.
    ///
    /// Both lookup directions see the new interaction, or neither does.
    pub fn append_interaction(
        &mut self,
        interaction: RelationshipInteraction,
    ) -> Result<InteractionId, GraphError> {
        let (a, b) = (interaction.character_a, interaction.character_b);
        if a == b {
            return Err(GraphError::SelfInteraction(a));
        }
        for id in [a, b] {
            if !self.profiles.contains_key(&id) {
                return Err(GraphError::NotFound(Missing::Character(id)));
            }
        }
        if self.interaction_index.contains_key(&interaction.id) {
            return Err(GraphError::DuplicateId(interaction.id.to_string()));
        }
        if let Some(event) = interaction.references_event {
            if !self.event_index.contains_key(&event) {
                return Err(GraphError::NotFound(Missing::Event(event)));
            }
        }
        let key = interaction.pair();
        if let Some(tail) = self.histories.get(&key).and_then(|h| h.last_chapter()) {
            if interaction.chapter() < tail {
                return Err(GraphError::OutOfOrderInteraction {
                    chapter: interaction.chapter(),
                    tail,
                });
            }
        }

        let id = interaction.id;
        let history = Arc::make_mut(&mut self.histories)
            .entry(key)
            .or_insert_with(|| Arc::new(RelationshipHistory::new(key)));
        Arc::make_mut(history).push(interaction);

        let partners = Arc::make_mut(&mut self.partners);
        partners.entry(a).or_default().insert(b);
        partners.entry(b).or_default().insert(a);
        Arc::make_mut(&mut self.interaction_index).insert(id, key);
        Ok(id)
    }

    /// Mark an interaction as a causal node descending from a past event.
    ///
    /// An interaction references at most one past event. Returns false when it
    /// already references `event`; a different event is refused with
    /// `CausalReferenceTaken` and the interaction is left as it was.
    pub fn annotate_causal(
        &mut self,
        id: InteractionId,
        event: EventId,
        reasoning: &str,
    ) -> Result<bool, GraphError> {
        if !self.event_index.contains_key(&event) {
            return Err(GraphError::NotFound(Missing::Event(event)));
        }
        match self.interaction(id).map(|i| i.references_event) {
            None => return Err(GraphError::NotFound(Missing::Interaction(id))),
            Some(Some(existing)) if existing == event => return Ok(false),
            Some(Some(existing)) => {
                return Err(GraphError::CausalReferenceTaken {
                    interaction: id,
                    existing,
                })
            }
            Some(None) => {}
        }
        let interaction = self.interaction_mut(id, Missing::Interaction(id))?;
        interaction.is_causal_node = true;
        interaction.references_event = Some(event);
        if !reasoning.trim().is_empty() {
            interaction.causal_reasoning = Some(reasoning.trim().to_string());
        }
        Ok(true)
    }

    /// Close an open causal node.
    ///
    /// Fails with `NotFound` when no such open node exists, including when it
    /// was already resolved.
    pub fn mark_resolved(&mut self, id: InteractionId, chapter: u32) -> Result<(), GraphError> {
        let open = self
            .interaction(id)
            .map(RelationshipInteraction::is_active_causal_node)
            .unwrap_or(false);
        if !open {
            return Err(GraphError::NotFound(Missing::OpenCausalNode(id)));
        }
        let interaction = self.interaction_mut(id, Missing::OpenCausalNode(id))?;
        interaction.resolved_in_chapter = Some(chapter);
        Ok(())
    }

    fn interaction_mut(
        &mut self,
        id: InteractionId,
        missing: Missing,
    ) -> Result<&mut RelationshipInteraction, GraphError> {
        let key = *self
            .interaction_index
            .get(&id)
            .ok_or(GraphError::NotFound(missing))?;
        Arc::make_mut(&mut self.histories)
            .get_mut(&key)
            .and_then(|history| Arc::make_mut(history).get_mut(id))
            .ok_or(GraphError::NotFound(missing))
    }

    /// The shared history of a pair, reachable from either direction.
    pub fn history(&self, a: CharacterId, b: CharacterId) -> Option<&RelationshipHistory> {
        self.histories.get(&PairKey::new(a, b)).map(|h| h.as_ref())
    }

    /// All histories, ordered by pair key.
    pub fn histories(&self) -> impl Iterator<Item = &RelationshipHistory> {
        self.histories.values().map(|h| h.as_ref())
    }

    /// Characters that share a history with `id`.
    pub fn partners_of(&self, id: CharacterId) -> impl Iterator<Item = CharacterId> + '_ {
        self.partners.get(&id).into_iter().flatten().copied()
    }

    /// All histories involving a character.
    pub fn histories_of(&self, id: CharacterId) -> Vec<&RelationshipHistory> {
        self.partners_of(id)
            .filter_map(|other| self.history(id, other))
            .collect()
    }

    /// Find an interaction by id.
    pub fn interaction(&self, id: InteractionId) -> Option<&RelationshipInteraction> {
        let key = self.interaction_index.get(&id)?;
        self.histories
            .get(key)?
            .interactions()
            .find(|i| i.id == id)
    }

    /// Unresolved causal nodes, in chapter order.
    pub fn active_causal_nodes(&self) -> Vec<&RelationshipInteraction> {
        let mut nodes: Vec<_> = self
            .histories()
            .flat_map(|h| h.interactions())
            .filter(|i| i.is_active_causal_node())
            .collect();
        nodes.sort_by_key(|i| i.chapter());
        nodes
    }

    // =========================================================================
    // Events
    // =========================================================================

    /// Append an event to the chronicle.
    pub fn add_event(&mut self, event: SignificantEvent) -> Result<EventId, GraphError> {
        if self.event_index.contains_key(&event.id) {
            return Err(GraphError::DuplicateId(event.id.to_string()));
        }
        if let Some(&unknown) = event
            .involved_characters
            .iter()
            .find(|id| !self.profiles.contains_key(id))
        {
            return Err(GraphError::NotFound(Missing::Character(unknown)));
        }
        let id = event.id;
        let position = self.events.len();
        Arc::make_mut(&mut self.events).push(Arc::new(event));
        Arc::make_mut(&mut self.event_index).insert(id, position);
        Ok(id)
    }

    /// Record a causal edge between two events.
    ///
    /// Returns `Ok(false)` if the same edge is already recorded.
    pub fn add_event_link(&mut self, link: EventLink) -> Result<bool, GraphError> {
        for id in [link.source, link.target] {
            if !self.event_index.contains_key(&id) {
                return Err(GraphError::NotFound(Missing::Event(id)));
            }
        }
        let known = self
            .event_links
            .iter()
            .any(|l| l.source == link.source && l.target == link.target);
        if known {
            return Ok(false);
        }
        Arc::make_mut(&mut self.event_links).push(link);
        Ok(true)
    }

    /// Get an event by id.
    pub fn event(&self, id: EventId) -> Option<&SignificantEvent> {
        self.event_index
            .get(&id)
            .and_then(|&i| self.events.get(i))
            .map(|e| e.as_ref())
    }

    /// Find a recorded event by chapter and description.
    pub fn find_event(&self, chapter_index: u32, description: &str) -> Option<&SignificantEvent> {
        self.events()
            .find(|e| e.same_happening(chapter_index, description))
    }

    /// The chronicle, in recording order.
    pub fn events(&self) -> impl Iterator<Item = &SignificantEvent> {
        self.events.iter().map(|e| e.as_ref())
    }

    /// Events recorded for one chapter.
    pub fn events_in_chapter(&self, chapter_index: u32) -> Vec<&SignificantEvent> {
        self.events()
            .filter(|e| e.chapter_index == chapter_index)
            .collect()
    }

    /// Causal edges between events.
    pub fn event_links(&self) -> &[EventLink] {
        &self.event_links
    }

    // =========================================================================
    // Mentions
    // =========================================================================

    /// Characters whose name or alias appears in `text` at word boundaries.
    ///
    /// "Andrew" matches in "Prince Andrew rode on" but not in "Andrewski".
    /// Results are in order of first appearance, then name.
    pub fn extract_mentioned_characters(&self, text: &str) -> Vec<CharacterId> {
        let text_lower = text.to_lowercase();
        let found: BTreeSet<CharacterId> = self
            .alias_index
            .iter()
            .filter(|(name, _)| contains_word(&text_lower, name))
            .map(|(_, &id)| id)
            .collect();

        let mut profiles: Vec<_> = found.into_iter().filter_map(|id| self.character(id)).collect();
        profiles.sort_by(|a, b| {
            a.first_appearance_chapter
                .cmp(&b.first_appearance_chapter)
                .then_with(|| a.canonical_name.cmp(&b.canonical_name))
        });
        profiles.into_iter().map(|p| p.id).collect()
    }

    // =========================================================================
    // Statistics
    // =========================================================================

    /// Number of characters.
    pub fn character_count(&self) -> usize {
        self.profiles.len()
    }

    /// Number of pairs with a history.
    pub fn relationship_count(&self) -> usize {
        self.histories.len()
    }

    /// Number of stored interactions.
    pub fn interaction_count(&self) -> usize {
        self.interaction_index.len()
    }

    /// Number of chronicle events.
    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    // =========================================================================
    // Validation
    // =========================================================================

    /// Verify every structural invariant of the graph.
    pub fn check_invariants(&self) -> Result<(), GraphError> {
        for (alias, id) in self.alias_index.iter() {
            let profile = self
                .profiles
                .get(id)
                .ok_or_else(|| corrupt(format!("alias '{alias}' points to missing character {id}")))?;
            if !profile.names().any(|n| normalize_alias(n) == *alias) {
                return Err(corrupt(format!("alias '{alias}' is not listed by character {id}")));
            }
        }

        for (id, profile) in self.profiles.iter() {
            if profile.id != *id {
                return Err(corrupt(format!("profile stored under {id} has id {}", profile.id)));
            }
            for name in profile.names() {
                if self.alias_index.get(&normalize_alias(name)) != Some(id) {
                    return Err(corrupt(format!("name '{name}' of {id} is not indexed to it")));
                }
            }
        }

        let mut total_interactions = 0;
        for (key, history) in self.histories.iter() {
            if history.pair != *key {
                return Err(corrupt(format!("history stored under {key} belongs to {}", history.pair)));
            }
            let (low, high) = key.endpoints();
            if low == high {
                return Err(corrupt(format!("history {key} has identical endpoints")));
            }
            for id in [low, high] {
                if !self.profiles.contains_key(&id) {
                    return Err(corrupt(format!("history {key} references missing character {id}")));
                }
            }
            if history.is_empty() {
                return Err(corrupt(format!("history {key} is empty")));
            }
            if !history.is_chronological() {
                return Err(corrupt(format!("history {key} is not in chapter order")));
            }
            let linked = |from: CharacterId, to: CharacterId| {
                self.partners.get(&from).is_some_and(|p| p.contains(&to))
            };
            if !linked(low, high) || !linked(high, low) {
                return Err(corrupt(format!("history {key} is not indexed in both directions")));
            }
            for interaction in history.interactions() {
                total_interactions += 1;
                if interaction.pair() != *key {
                    return Err(corrupt(format!("interaction {} filed under {key}", interaction.id)));
                }
                if self.interaction_index.get(&interaction.id) != Some(key) {
                    return Err(corrupt(format!("interaction {} is not indexed", interaction.id)));
                }
                if let Some(event) = interaction.references_event {
                    if !self.event_index.contains_key(&event) {
                        return Err(corrupt(format!(
                            "interaction {} references missing event {event}",
                            interaction.id
                        )));
                    }
                }
            }
        }
        if total_interactions != self.interaction_index.len() {
            return Err(corrupt("interaction ids are not unique".to_string()));
        }

        for (&from, partners) in self.partners.iter() {
            for &to in partners {
                if !self.histories.contains_key(&PairKey::new(from, to)) {
                    return Err(corrupt(format!("partner entry {from} -> {to} has no history")));
                }
            }
        }

        if self.event_index.len() != self.events.len() {
            return Err(corrupt("event ids are not unique".to_string()));
        }
        for (position, event) in self.events.iter().enumerate() {
            if self.event_index.get(&event.id) != Some(&position) {
                return Err(corrupt(format!("event {} is not indexed", event.id)));
            }
        }
        for link in self.event_links.iter() {
            for id in [link.source, link.target] {
                if !self.event_index.contains_key(&id) {
                    return Err(corrupt(format!("event link references missing event {id}")));
                }
            }
        }
        Ok(())
    }
}

fn corrupt(message: String) -> GraphError {
    GraphError::Corrupt(message)
}

/// Check if `text` contains `word` at word boundaries.
///
/// A boundary is the start or end of the text or a non-alphanumeric
/// character, so multi-word names match as a phrase.
fn contains_word(text: &str, word: &str) -> bool {
    if word.is_empty() {
        return false;
    }
    text.match_indices(word).any(|(i, _)| {
        let left_ok = text[..i]
            .chars()
            .next_back()
            .map_or(true, |c| !c.is_alphanumeric());
        let right_ok = text[i + word.len()..]
            .chars()
            .next()
            .map_or(true, |c| !c.is_alphanumeric());
        left_ok && right_ok
    })
}

/// Persisted shape of the store. Derived indexes are rebuilt on load.
#[derive(Serialize, Deserialize)]
struct GraphStoreRepr {
    characters: Vec<Arc<CharacterProfile>>,
    aliases: BTreeMap<String, CharacterId>,
    relationships: Vec<Arc<RelationshipHistory>>,
    events: Vec<Arc<SignificantEvent>>,
    #[serde(default)]
    event_links: Vec<EventLink>,
}

impl From<GraphStore> for GraphStoreRepr {
    fn from(store: GraphStore) -> Self {
        Self {
            characters: store.profiles.values().cloned().collect(),
            aliases: store.alias_index.as_ref().clone(),
            relationships: store.histories.values().cloned().collect(),
            events: store.events.as_ref().clone(),
            event_links: store.event_links.as_ref().clone(),
        }
    }
}

/// Keys must be unique in the persisted lists; a repeated one would be
/// collapsed by the maps and hidden from `check_invariants`.
impl TryFrom<GraphStoreRepr> for GraphStore {
    type Error = GraphError;

    fn try_from(repr: GraphStoreRepr) -> Result<Self, Self::Error> {
        let mut profiles = BTreeMap::new();
        for profile in repr.characters {
            let id = profile.id;
            if profiles.insert(id, profile).is_some() {
                return Err(corrupt(format!("character {id} is stored twice")));
            }
        }

        let mut histories = BTreeMap::new();
        let mut partners: BTreeMap<CharacterId, BTreeSet<CharacterId>> = BTreeMap::new();
        let mut interaction_index = BTreeMap::new();
        for history in repr.relationships {
            let pair = history.pair;
            let (low, high) = pair.endpoints();
            partners.entry(low).or_default().insert(high);
            partners.entry(high).or_default().insert(low);
            for interaction in history.interactions() {
                interaction_index.insert(interaction.id, pair);
            }
            if histories.insert(pair, history).is_some() {
                return Err(corrupt(format!("history {pair} is stored twice")));
            }
        }
        let event_index = repr
            .events
            .iter()
            .enumerate()
            .map(|(i, e)| (e.id, i))
            .collect();

        Ok(Self {
            profiles: Arc::new(profiles),
            alias_index: Arc::new(repr.aliases),
            histories: Arc::new(histories),
            partners: Arc::new(partners),
            interaction_index: Arc::new(interaction_index),
            events: Arc::new(repr.events),
            event_index: Arc::new(event_index),
            event_links: Arc::new(repr.event_links),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::event::Significance;
    use crate::graph::relationship::RelationshipEvidence;
    use chrono::Utc;

    fn interaction(a: CharacterId, b: CharacterId, chapter: u32, label: &str) -> RelationshipInteraction {
        RelationshipInteraction {
            id: InteractionId::new(),
            character_a: a,
            character_b: b,
            relation_type: label.to_string(),
            reasoning: "Reasoning".to_string(),
            context: "Context".to_string(),
            evidence: RelationshipEvidence {
                quote: format!("Quote from chapter {chapter}"),
                chapter_index: chapter,
                chapter_title: format!("CHAPTER {chapter}"),
            },
            recorded_at: Utc::now(),
            is_causal_node: false,
            resolved_in_chapter: None,
            references_event: None,
            causal_reasoning: None,
        }
    }

    fn event(chapter: u32, description: &str, involved: Vec<CharacterId>) -> SignificantEvent {
        SignificantEvent {
            id: EventId::new(),
            chapter_index: chapter,
            chapter_title: format!("CHAPTER {chapter}"),
            description: description.to_string(),
            involved_characters: involved,
            evidence_quote: "It happened just like that".to_string(),
            significance: Significance::Moderate,
        }
    }

    #[test]
    fn test_store_creation() {
        let store = GraphStore::new();
        assert_eq!(store.character_count(), 0);
        assert_eq!(store.event_count(), 0);
        assert!(store.check_invariants().is_ok());
    }

    #[test]
    fn test_character_lookup_is_case_insensitive() {
        let mut store = GraphStore::new();
        let pierre = store.create_character("Pierre", 1).unwrap();

        assert_eq!(store.lookup_character("pierre"), Some(pierre));
        assert_eq!(store.lookup_character("  PIERRE "), Some(pierre));
        assert_eq!(store.lookup_character("Andrew"), None);
    }

    #[test]
    fn test_create_character_rejects_bound_name() {
        let mut store = GraphStore::new();
        let pierre = store.create_character("Pierre", 1).unwrap();
        let err = store.create_character("PIERRE", 2).unwrap_err();
        assert_eq!(
            err,
            GraphError::AliasConflict {
                alias: "PIERRE".into(),
                existing: pierre
            }
        );
        assert_eq!(store.character_count(), 1);
    }

    #[test]
    fn test_alias_first_binding_wins() {
        let mut store = GraphStore::new();
        let pierre = store.create_character("Pierre", 1).unwrap();
        let andrew = store.create_character("Andrew", 1).unwrap();

        assert_eq!(store.record_alias(pierre, "Count Bezukhov"), Ok(true));
        assert_eq!(store.record_alias(pierre, "count bezukhov"), Ok(false));
        assert!(matches!(
            store.record_alias(andrew, "Count Bezukhov"),
            Err(GraphError::AliasConflict { existing, .. }) if existing == pierre
        ));

        assert_eq!(store.lookup_character("count bezukhov"), Some(pierre));
        assert!(store.character(andrew).unwrap().aliases.is_empty());
        assert!(store.check_invariants().is_ok());
    }

    #[test]
    fn test_record_alias_unknown_character() {
        let mut store = GraphStore::new();
        let ghost = CharacterId::new();
        assert_eq!(
            store.record_alias(ghost, "Nobody"),
            Err(GraphError::NotFound(Missing::Character(ghost)))
        );
        assert_eq!(store.record_alias(ghost, "   "), Err(GraphError::EmptyName));
    }

    #[test]
    fn test_history_is_shared_between_directions() {
        let mut store = GraphStore::new();
        let a = store.create_character("Natasha", 1).unwrap();
        let b = store.create_character("Andrew", 1).unwrap();

        store.append_interaction(interaction(a, b, 2, "Dance partners")).unwrap();
        store.append_interaction(interaction(b, a, 5, "Engaged")).unwrap();

        let forward = store.history(a, b).unwrap();
        let backward = store.history(b, a).unwrap();
        assert_eq!(forward, backward);
        assert_eq!(forward.len(), 2);
        assert_eq!(forward.current_status(), Some("Engaged"));
        assert_eq!(store.partners_of(a).collect::<Vec<_>>(), vec![b]);
        assert_eq!(store.partners_of(b).collect::<Vec<_>>(), vec![a]);
        assert_eq!(store.relationship_count(), 1);
        assert!(store.check_invariants().is_ok());
    }

    #[test]
    fn test_out_of_order_interaction_rejected() {
        let mut store = GraphStore::new();
        let a = store.create_character("Natasha", 1).unwrap();
        let b = store.create_character("Andrew", 1).unwrap();
        store.append_interaction(interaction(a, b, 7, "Engaged")).unwrap();

        let err = store.append_interaction(interaction(a, b, 3, "Strangers")).unwrap_err();
        assert_eq!(err, GraphError::OutOfOrderInteraction { chapter: 3, tail: 7 });
        assert_eq!(store.history(a, b).unwrap().len(), 1);

        // Same chapter as the tail is fine
        store.append_interaction(interaction(b, a, 7, "Estranged")).unwrap();
        assert_eq!(store.history(a, b).unwrap().len(), 2);
    }

    #[test]
    fn test_self_interaction_rejected() {
        let mut store = GraphStore::new();
        let a = store.create_character("Pierre", 1).unwrap();
        assert_eq!(
            store.append_interaction(interaction(a, a, 1, "Self doubt")),
            Err(GraphError::SelfInteraction(a))
        );
        assert_eq!(store.interaction_count(), 0);
    }

    #[test]
    fn test_causal_lifecycle() {
        let mut store = GraphStore::new();
        let a = store.create_character("Pierre", 5).unwrap();
        let b = store.create_character("Dolokhov", 5).unwrap();
        let duel = store.add_event(event(5, "The duel", vec![a, b])).unwrap();
        let id = store.append_interaction(interaction(a, b, 5, "Enemies")).unwrap();

        store.annotate_causal(id, duel, "The duel sets everything in motion").unwrap();
        assert_eq!(store.active_causal_nodes().len(), 1);

        store.mark_resolved(id, 40).unwrap();
        assert_eq!(store.interaction(id).unwrap().resolved_in_chapter, Some(40));
        assert!(store.active_causal_nodes().is_empty());

        // Resolving twice fails and leaves the first resolution
        assert_eq!(
            store.mark_resolved(id, 41),
            Err(GraphError::NotFound(Missing::OpenCausalNode(id)))
        );
        assert_eq!(store.interaction(id).unwrap().resolved_in_chapter, Some(40));
    }

    #[test]
    fn test_clone_is_isolated() {
        let mut store = GraphStore::new();
        let a = store.create_character("Pierre", 1).unwrap();
        let b = store.create_character("Helene", 1).unwrap();
        let snapshot = store.clone();

        store.record_alias(a, "Bezukhov").unwrap();
        store.append_interaction(interaction(a, b, 2, "Married")).unwrap();
        store.set_importance(a, 3.0).unwrap();

        assert_eq!(snapshot.lookup_character("Bezukhov"), None);
        assert!(snapshot.history(a, b).is_none());
        assert_eq!(snapshot.character(a).unwrap().importance, 0.0);
        assert_eq!(store.character(a).unwrap().importance, 1.0);
    }

    #[test]
    fn test_event_links_deduplicate() {
        let mut store = GraphStore::new();
        let first = store.add_event(event(1, "A promise", vec![])).unwrap();
        let second = store.add_event(event(9, "The promise is kept", vec![])).unwrap();
        let link = EventLink {
            source: first,
            target: second,
            reasoning: "Keeping the promise".into(),
            past_quote: String::new(),
            current_quote: String::new(),
        };
        assert_eq!(store.add_event_link(link.clone()), Ok(true));
        assert_eq!(store.add_event_link(link), Ok(false));
        assert_eq!(store.event_links().len(), 1);
        assert_eq!(store.find_event(9, "the promise is kept").map(|e| e.id), Some(second));
    }

    #[test]
    fn test_event_with_unknown_character_rejected() {
        let mut store = GraphStore::new();
        let ghost = CharacterId::new();
        assert_eq!(
            store.add_event(event(1, "Haunting", vec![ghost])),
            Err(GraphError::NotFound(Missing::Character(ghost)))
        );
        assert_eq!(store.event_count(), 0);
    }

    #[test]
    fn test_mention_extraction_word_boundaries() {
        let mut store = GraphStore::new();
        let andrew = store.create_character("Andrew", 1).unwrap();
        let mary = store.create_character("Princess Mary", 2).unwrap();
        store.create_character("Ann", 3).unwrap();

        let found = store.extract_mentioned_characters("Prince Andrew wrote to Princess Mary. Annette smiled.");
        assert_eq!(found, vec![andrew, mary]);
        assert!(store.extract_mentioned_characters("Andrewski").is_empty());
    }

    #[test]
    fn test_contains_word_helper() {
        assert!(contains_word("i ask thor about it", "thor"));
        assert!(contains_word("thor", "thor"));
        assert!(contains_word("\"thor!\"", "thor"));
        assert!(!contains_word("thorin", "thor"));
        assert!(!contains_word("anything", ""));
        assert!(contains_word("sonya and nikolai", "nikolai"));
        assert!(contains_word("старая наташа", "наташа"));
    }

    #[test]
    fn test_serde_rebuilds_indexes() {
        let mut store = GraphStore::new();
        let a = store.create_character("Pierre", 1).unwrap();
        let b = store.create_character("Andrew", 1).unwrap();
        store.record_alias(a, "Bezukhov").unwrap();
        let id = store.append_interaction(interaction(a, b, 2, "Friends")).unwrap();
        store.add_event(event(2, "Conversation at the ferry", vec![a, b])).unwrap();

        let json = serde_json::to_string(&store).unwrap();
        let restored: GraphStore = serde_json::from_str(&json).unwrap();

        assert_eq!(restored, store);
        assert!(restored.check_invariants().is_ok());
        assert_eq!(restored.interaction(id).map(|i| i.chapter()), Some(2));
        assert_eq!(restored.partners_of(b).collect::<Vec<_>>(), vec![a]);
    }

    #[test]
    fn test_check_invariants_detects_dangling_alias() {
        let mut store = GraphStore::new();
        store.create_character("Pierre", 1).unwrap();
        let mut value = serde_json::to_value(&store).unwrap();
        value["aliases"]["ghost"] = serde_json::json!(CharacterId::new());

        let restored: GraphStore = serde_json::from_value(value).unwrap();
        assert!(matches!(restored.check_invariants(), Err(GraphError::Corrupt(_))));
    }

    #[test]
    fn test_causal_reference_is_not_overwritten() {
        let mut store = GraphStore::new();
        let a = store.create_character("Pierre", 1).unwrap();
        let b = store.create_character("Helene", 1).unwrap();
        let flirt = store.add_event(event(1, "Helene flirts with Dolokhov", vec![b])).unwrap();
        let letter = store.add_event(event(1, "The anonymous letter", vec![a])).unwrap();
        let id = store.append_interaction(interaction(a, b, 2, "Separated")).unwrap();

        assert_eq!(store.annotate_causal(id, flirt, "Jealousy"), Ok(true));
        assert_eq!(store.annotate_causal(id, flirt, "Jealousy"), Ok(false));
        assert_eq!(
            store.annotate_causal(id, letter, "The letter"),
            Err(GraphError::CausalReferenceTaken {
                interaction: id,
                existing: flirt
            })
        );
        let stored = store.interaction(id).unwrap();
        assert_eq!(stored.references_event, Some(flirt));
        assert_eq!(stored.causal_reasoning.as_deref(), Some("Jealousy"));
    }

    #[test]
    fn test_duplicate_profile_in_snapshot_is_corrupt() {
        let mut store = GraphStore::new();
        store.create_character("Pierre", 1).unwrap();
        let mut value = serde_json::to_value(&store).unwrap();
        let profile = value["characters"][0].clone();
        value["characters"].as_array_mut().unwrap().push(profile);

        let err = serde_json::from_value::<GraphStore>(value).unwrap_err();
        assert!(err.to_string().contains("stored twice"));
    }

    #[test]
    fn test_duplicate_history_in_snapshot_is_corrupt() {
        let mut store = GraphStore::new();
        let a = store.create_character("Pierre", 1).unwrap();
        let b = store.create_character("Andrew", 1).unwrap();
        store.append_interaction(interaction(a, b, 2, "Friends")).unwrap();
        let mut value = serde_json::to_value(&store).unwrap();
        let history = value["relationships"][0].clone();
        value["relationships"].as_array_mut().unwrap().push(history);

        assert!(serde_json::from_value::<GraphStore>(value).is_err());
    }

    #[test]
    fn test_alias_lookup_ignores_spacing() {
        let mut store = GraphStore::new();
        let pierre = store.create_character("Pierre", 1).unwrap();
        assert_eq!(store.record_alias(pierre, "Pierre  Bezukhov"), Ok(true));
        assert_eq!(store.record_alias(pierre, "pierre bezukhov"), Ok(false));
        assert_eq!(store.lookup_character(" Pierre\tBezukhov "), Some(pierre));
        assert_eq!(store.character(pierre).unwrap().aliases, vec!["Pierre Bezukhov".to_string()]);
        assert!(store.check_invariants().is_ok());
    }
}
