//! The event chronicle.
//!
//! Events are immutable once recorded. Later interactions and events refer to
//! them by id instead of copying them.

use super::character::CharacterId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a chronicle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    /// Mint a fresh identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How much an event matters to the story.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Significance {
    /// Turning point for the whole plot.
    Major,
    /// Shapes a subplot or a character arc.
    Moderate,
    /// Worth remembering, little lasting impact.
    Minor,
}

impl Significance {
    /// Get the display name.
    pub fn name(&self) -> &'static str {
        match self {
            Significance::Major => "major",
            Significance::Moderate => "moderate",
            Significance::Minor => "minor",
        }
    }

    /// Parse a tier name (case-insensitive).
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "major" => Some(Significance::Major),
            "moderate" => Some(Significance::Moderate),
            "minor" => Some(Significance::Minor),
            _ => None,
        }
    }
}

/// A chronicle entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignificantEvent {
    /// Unique identifier.
    pub id: EventId,
    /// Chapter in which the event happens.
    pub chapter_index: u32,
    /// Chapter title, for display.
    pub chapter_title: String,
    /// Short description of what happened.
    pub description: String,
    /// Characters taking part in the event.
    pub involved_characters: Vec<CharacterId>,
    /// Supporting quote.
    pub evidence_quote: String,
    /// Significance tier.
    pub significance: Significance,
}

impl SignificantEvent {
    /// Whether this event describes the same happening as `(chapter, description)`.
    pub fn same_happening(&self, chapter_index: u32, description: &str) -> bool {
        self.chapter_index == chapter_index
            && self.description.trim().to_lowercase() == description.trim().to_lowercase()
    }

    /// Check if a character takes part in this event.
    pub fn involves(&self, id: CharacterId) -> bool {
        self.involved_characters.contains(&id)
    }
}

/// A causal edge from a past event to a later one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventLink {
    /// Earlier event (the cause).
    pub source: EventId,
    /// Later event (the effect).
    pub target: EventId,
    /// Why the two are connected.
    pub reasoning: String,
    /// Quote from the cause's chapter.
    #[serde(default)]
    pub past_quote: String,
    /// Quote from the effect's chapter.
    #[serde(default)]
    pub current_quote: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_significance_parse() {
        assert_eq!(Significance::parse("MAJOR"), Some(Significance::Major));
        assert_eq!(Significance::parse(" minor "), Some(Significance::Minor));
        assert_eq!(Significance::parse("huge"), None);
        assert_eq!(Significance::Moderate.name(), "moderate");
    }

    #[test]
    fn test_same_happening() {
        let event = SignificantEvent {
            id: EventId::new(),
            chapter_index: 5,
            chapter_title: "CHAPTER V".into(),
            description: "The duel at Sokolniki".into(),
            involved_characters: vec![],
            evidence_quote: "Pierre fired without aiming".into(),
            significance: Significance::Major,
        };
        assert!(event.same_happening(5, "the duel at sokolniki "));
        assert!(!event.same_happening(6, "The duel at Sokolniki"));
    }
}
