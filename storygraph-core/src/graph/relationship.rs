//! Relationship histories between pairs of characters.
//!
//! A history is append-only. The only annotation that may change after an
//! interaction is stored is its causal lifecycle (`resolved_in_chapter`).

use super::character::CharacterId;
use super::event::EventId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Unique identifier for a single relationship interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InteractionId(Uuid);

impl InteractionId {
    /// Mint a fresh identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for InteractionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for InteractionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Error parsing a serialized [`PairKey`].
#[derive(Debug, Error)]
#[error("invalid relationship key '{0}'")]
pub struct ParsePairKeyError(String);

/// Key of the single shared history between two characters.
///
/// `PairKey::new(a, b) == PairKey::new(b, a)`, so both lookup directions reach
/// the same history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct PairKey {
    low: CharacterId,
    high: CharacterId,
}

impl PairKey {
    /// Build the key for an unordered pair.
    pub fn new(a: CharacterId, b: CharacterId) -> Self {
        if a <= b {
            Self { low: a, high: b }
        } else {
            Self { low: b, high: a }
        }
    }

    /// Both endpoints, in canonical order.
    pub fn endpoints(&self) -> (CharacterId, CharacterId) {
        (self.low, self.high)
    }

    /// Check if the pair includes a character.
    pub fn involves(&self, id: CharacterId) -> bool {
        self.low == id || self.high == id
    }

    /// The endpoint opposite to `id`.
    pub fn other(&self, id: CharacterId) -> Option<CharacterId> {
        if self.low == id {
            Some(self.high)
        } else if self.high == id {
            Some(self.low)
        } else {
            None
        }
    }
}

impl std::fmt::Display for PairKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}::{}", self.low, self.high)
    }
}

impl From<PairKey> for String {
    fn from(key: PairKey) -> Self {
        key.to_string()
    }
}

impl TryFrom<String> for PairKey {
    type Error = ParsePairKeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl FromStr for PairKey {
    type Err = ParsePairKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (a, b) = s
            .split_once("::")
            .ok_or_else(|| ParsePairKeyError(s.to_string()))?;
        let parse = |part: &str| {
            Uuid::parse_str(part)
                .map(CharacterId::from_uuid)
                .map_err(|_| ParsePairKeyError(s.to_string()))
        };
        Ok(PairKey::new(parse(a)?, parse(b)?))
    }
}

/// Textual evidence supporting a relationship claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipEvidence {
    /// Verbatim quote from the chapter.
    pub quote: String,
    /// Zero-based chapter index where the quote appears.
    pub chapter_index: u32,
    /// Chapter title, for display.
    pub chapter_title: String,
}

/// One chronological relationship fact between two characters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipInteraction {
    /// Unique identifier.
    pub id: InteractionId,
    /// First character as reported by the extractor.
    pub character_a: CharacterId,
    /// Second character as reported by the extractor.
    pub character_b: CharacterId,
    /// Free-form label, e.g. "Secret Alliance".
    pub relation_type: String,
    /// Why this relationship exists.
    pub reasoning: String,
    /// Situation of the interaction.
    pub context: String,
    /// Supporting quote.
    pub evidence: RelationshipEvidence,
    /// When the engine recorded this interaction.
    pub recorded_at: DateTime<Utc>,
    /// Whether this interaction is a narratively pivotal causal node.
    #[serde(default)]
    pub is_causal_node: bool,
    /// Chapter in which the causal node was resolved.
    #[serde(default)]
    pub resolved_in_chapter: Option<u32>,
    /// Past event this interaction descends from.
    #[serde(default)]
    pub references_event: Option<EventId>,
    /// Explanation of the causal connection, if any.
    #[serde(default)]
    pub causal_reasoning: Option<String>,
}

impl RelationshipInteraction {
    /// Chapter of the supporting evidence.
    pub fn chapter(&self) -> u32 {
        self.evidence.chapter_index
    }

    /// The shared history key for this interaction.
    pub fn pair(&self) -> PairKey {
        PairKey::new(self.character_a, self.character_b)
    }

    /// An open causal node stays in working context until resolved.
    pub fn is_active_causal_node(&self) -> bool {
        self.is_causal_node && self.resolved_in_chapter.is_none()
    }

    /// Whether this interaction records the same fact as `other`.
    ///
    /// Ids and timestamps are ignored.
    pub fn same_fact(&self, other: &RelationshipInteraction) -> bool {
        self.pair() == other.pair()
            && self.evidence.chapter_index == other.evidence.chapter_index
            && self.relation_type.eq_ignore_ascii_case(&other.relation_type)
            && self.evidence.quote == other.evidence.quote
    }
}

/// Complete, ordered history of interactions between two characters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipHistory {
    /// The pair this history belongs to.
    pub pair: PairKey,
    /// Interactions, non-decreasing by evidence chapter.
    interactions: Vec<Arc<RelationshipInteraction>>,
}

impl RelationshipHistory {
    /// Create an empty history for a pair.
    pub fn new(pair: PairKey) -> Self {
        Self {
            pair,
            interactions: Vec::new(),
        }
    }

    /// Current status: the relation type of the latest interaction.
    pub fn current_status(&self) -> Option<&str> {
        self.interactions.last().map(|i| i.relation_type.as_str())
    }

    /// Chapter where these characters first interacted.
    pub fn first_chapter(&self) -> Option<u32> {
        self.interactions.first().map(|i| i.chapter())
    }

    /// Chapter of the most recent interaction.
    pub fn last_chapter(&self) -> Option<u32> {
        self.interactions.last().map(|i| i.chapter())
    }

    /// All interactions in chronological order.
    pub fn interactions(&self) -> impl Iterator<Item = &RelationshipInteraction> {
        self.interactions.iter().map(|i| i.as_ref())
    }

    /// Number of interactions.
    pub fn len(&self) -> usize {
        self.interactions.len()
    }

    /// Whether the history is empty.
    pub fn is_empty(&self) -> bool {
        self.interactions.is_empty()
    }

    /// Find a stored interaction recording the same fact.
    pub fn find_same_fact(&self, candidate: &RelationshipInteraction) -> Option<&RelationshipInteraction> {
        // Only interactions from the candidate's chapter can match, and those
        // sit at the tail.
        self.interactions
            .iter()
            .rev()
            .take_while(|i| i.chapter() >= candidate.chapter())
            .map(|i| i.as_ref())
            .find(|i| i.same_fact(candidate))
    }

    pub(crate) fn push(&mut self, interaction: RelationshipInteraction) {
        self.interactions.push(Arc::new(interaction));
    }

    pub(crate) fn get_mut(&mut self, id: InteractionId) -> Option<&mut RelationshipInteraction> {
        self.interactions
            .iter_mut()
            .find(|i| i.id == id)
            .map(Arc::make_mut)
    }

    /// Check that chapters never decrease along the history.
    pub fn is_chronological(&self) -> bool {
        self.interactions
            .windows(2)
            .all(|w| w[0].chapter() <= w[1].chapter())
    }
}
