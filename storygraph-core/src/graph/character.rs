//! Character profiles: one canonical identity per character.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable identifier of a character profile.
///
/// Assigned once when the profile is created and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CharacterId(Uuid);

impl CharacterId {
    /// Mint a fresh identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub(crate) fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for CharacterId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CharacterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Normalize a name or alias for index lookups.
///
/// Lowercases and collapses every run of whitespace to a single space.
pub fn normalize_alias(alias: &str) -> String {
    alias.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

/// Canonical entry for one character in the knowledge graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterProfile {
    /// Unique identifier.
    pub id: CharacterId,
    /// Primary display name.
    pub canonical_name: String,
    /// Other names this character is known by, in the order they were bound.
    /// Never contains the canonical name itself.
    pub aliases: Vec<String>,
    /// Chapter where the character first appeared. Immutable after creation.
    pub first_appearance_chapter: u32,
    /// Brief description from the chapter that introduced the character.
    #[serde(default)]
    pub description: String,
    /// Concise identity summary.
    #[serde(default)]
    pub identity: Option<String>,
    /// Traits accumulated across chapters.
    #[serde(default)]
    pub core_traits: Vec<String>,
    /// Most recently reported goals.
    #[serde(default)]
    pub current_goals: Vec<String>,
    /// Latest evolution summary. Replaced on every update.
    #[serde(default)]
    pub evolution_summary: Option<String>,
    /// Most recent location, if mentioned.
    #[serde(default)]
    pub last_known_location: Option<String>,
    /// Importance in [0, 1]. Only the scoring step writes this.
    #[serde(default)]
    pub importance: f32,
}

impl CharacterProfile {
    /// Create a new profile for a character first seen in `first_chapter`.
    pub fn new(name: impl Into<String>, first_chapter: u32) -> Self {
        Self {
            id: CharacterId::new(),
            canonical_name: name.into(),
            aliases: Vec::new(),
            first_appearance_chapter: first_chapter,
            description: String::new(),
            identity: None,
            core_traits: Vec::new(),
            current_goals: Vec::new(),
            evolution_summary: None,
            last_known_location: None,
            importance: 0.0,
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// All names this character answers to, canonical name first.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.canonical_name.as_str()).chain(self.aliases.iter().map(String::as_str))
    }

    /// Check if a name matches this character (case-insensitive).
    pub fn matches_name(&self, query: &str) -> bool {
        let query = normalize_alias(query);
        self.names().any(|n| normalize_alias(n) == query)
    }

    /// Remember an alias. Returns false if the name is already known.
    pub(crate) fn push_alias(&mut self, alias: &str) -> bool {
        if self.matches_name(alias) {
            return false;
        }
        self.aliases.push(alias.split_whitespace().collect::<Vec<_>>().join(" "));
        true
    }

    /// Fold a dossier update into this profile.
    ///
    /// Traits accumulate, goals are replaced by a non-empty update, and the
    /// evolution summary and location are latest-wins.
    pub fn apply_dossier(&mut self, update: &DossierPatch) {
        if let Some(identity) = non_empty(update.identity.as_deref()) {
            self.identity = Some(identity.to_string());
        }
        for trait_name in &update.core_traits {
            let trait_name = trait_name.trim();
            if trait_name.is_empty() {
                continue;
            }
            let known = self
                .core_traits
                .iter()
                .any(|t| t.eq_ignore_ascii_case(trait_name));
            if !known {
                self.core_traits.push(trait_name.to_string());
            }
        }
        let goals: Vec<String> = update
            .current_goals
            .iter()
            .map(|g| g.trim())
            .filter(|g| !g.is_empty())
            .map(str::to_string)
            .collect();
        if !goals.is_empty() {
            self.current_goals = goals;
        }
        if let Some(summary) = non_empty(update.evolution_summary.as_deref()) {
            self.evolution_summary = Some(summary.to_string());
        }
        if let Some(location) = non_empty(update.last_known_location.as_deref()) {
            self.last_known_location = Some(location.to_string());
        }
    }
}

/// The dossier fields a single chapter may update.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DossierPatch {
    #[serde(default)]
    pub identity: Option<String>,
    #[serde(default)]
    pub core_traits: Vec<String>,
    #[serde(default)]
    pub current_goals: Vec<String>,
    #[serde(default)]
    pub evolution_summary: Option<String>,
    #[serde(default)]
    pub last_known_location: Option<String>,
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
