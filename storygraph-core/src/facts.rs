//! Candidate facts returned by the extractor for one chapter.
//!
//! A [`FactBatch`] is checked as a whole before it reaches the merge engine.
//! A batch that fails the check is rejected in full; a batch that passes is
//! wrapped in [`ValidatedBatch`], the only form the merge engine accepts.

use crate::config::EngineConfig;
use crate::graph::{CharacterId, DossierPatch, EventId, InteractionId, Significance};
use serde::{Deserialize, Serialize};
use std::ops::Deref;
use thiserror::Error;

/// A fact batch that failed required-field validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed fact batch for chapter {chapter}: {}", .problems.join("; "))]
pub struct MalformedFactBatch {
    pub chapter: u32,
    pub problems: Vec<String>,
}

/// A character introduced by this chapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCharacter {
    /// Suggested canonical name.
    pub name: String,
    /// Other names used for the character in this chapter.
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub description: String,
}

/// A claim that a mention refers to an already known character.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AliasMapping {
    /// The mention as it appears in the text.
    pub alias: String,
    /// Claimed existing identity.
    #[serde(default)]
    pub canonical_id: Option<CharacterId>,
    /// Claimed existing identity, by name. Used when no id is given.
    #[serde(default)]
    pub canonical_name: Option<String>,
    #[serde(default)]
    pub reasoning: String,
}

/// Dossier changes for a character named in the chapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DossierUpdate {
    pub character: String,
    #[serde(flatten)]
    pub patch: DossierPatch,
}

/// A relationship interaction between two named characters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateInteraction {
    pub character_a: String,
    pub character_b: String,
    pub relation_type: String,
    pub reasoning: String,
    pub context: String,
    /// Verbatim quote from this chapter.
    pub quote: String,
    /// Opens a causal node.
    #[serde(default)]
    pub is_causal_node: bool,
    /// A prior open causal node this interaction resolves.
    #[serde(default)]
    pub resolves_causal_node: Option<InteractionId>,
    #[serde(default)]
    pub causal_reasoning: Option<String>,
}

/// A significant event of this chapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateEvent {
    pub description: String,
    #[serde(default)]
    pub involved: Vec<String>,
    pub quote: String,
    pub significance: Significance,
}

/// A claim that something in this chapter descends from a past event.
///
/// The effect is named by its position in this batch's `interactions` or
/// `events` list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateCausalLink {
    pub past_event: EventId,
    #[serde(default)]
    pub interaction: Option<usize>,
    #[serde(default)]
    pub event: Option<usize>,
    pub reasoning: String,
    #[serde(default)]
    pub past_quote: String,
    #[serde(default)]
    pub current_quote: String,
}

/// Everything the extractor found in one chapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactBatch {
    pub chapter_index: u32,
    pub chapter_title: String,
    /// Short summary of the chapter, fed to consolidation later.
    pub summary: String,
    #[serde(default)]
    pub new_characters: Vec<NewCharacter>,
    #[serde(default)]
    pub alias_mappings: Vec<AliasMapping>,
    #[serde(default)]
    pub dossier_updates: Vec<DossierUpdate>,
    #[serde(default)]
    pub interactions: Vec<CandidateInteraction>,
    #[serde(default)]
    pub events: Vec<CandidateEvent>,
    #[serde(default)]
    pub causal_links: Vec<CandidateCausalLink>,
}

impl FactBatch {
    /// Start an empty batch for a chapter.
    pub fn new(chapter_index: u32, chapter_title: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            chapter_index,
            chapter_title: chapter_title.into(),
            summary: summary.into(),
            new_characters: Vec::new(),
            alias_mappings: Vec::new(),
            dossier_updates: Vec::new(),
            interactions: Vec::new(),
            events: Vec::new(),
            causal_links: Vec::new(),
        }
    }

    /// Add a new character.
    pub fn with_character(mut self, name: impl Into<String>, description: impl Into<String>) -> Self {
        self.new_characters.push(NewCharacter {
            name: name.into(),
            aliases: Vec::new(),
            description: description.into(),
        });
        self
    }

    /// Map an alias to a known character by name.
    pub fn with_alias(mut self, alias: impl Into<String>, canonical_name: impl Into<String>) -> Self {
        self.alias_mappings.push(AliasMapping {
            alias: alias.into(),
            canonical_id: None,
            canonical_name: Some(canonical_name.into()),
            reasoning: String::new(),
        });
        self
    }

    /// Add an interaction.
    pub fn with_interaction(mut self, interaction: CandidateInteraction) -> Self {
        self.interactions.push(interaction);
        self
    }

    /// Add an event.
    pub fn with_event(mut self, event: CandidateEvent) -> Self {
        self.events.push(event);
        self
    }

    /// Add a causal link.
    pub fn with_causal_link(mut self, link: CandidateCausalLink) -> Self {
        self.causal_links.push(link);
        self
    }

    /// Check every required field, collecting all problems.
    pub fn validate(self, config: &EngineConfig) -> Result<ValidatedBatch, MalformedFactBatch> {
        let mut problems = Vec::new();
        let mut require = |ok: bool, problem: String| {
            if !ok {
                problems.push(problem);
            }
        };

        require(!blank(&self.chapter_title), "chapter_title is empty".into());
        require(!blank(&self.summary), "summary is empty".into());

        for (i, character) in self.new_characters.iter().enumerate() {
            require(!blank(&character.name), format!("new_characters[{i}].name is empty"));
            for (j, alias) in character.aliases.iter().enumerate() {
                require(!blank(alias), format!("new_characters[{i}].aliases[{j}] is empty"));
            }
        }

        for (i, mapping) in self.alias_mappings.iter().enumerate() {
            require(!blank(&mapping.alias), format!("alias_mappings[{i}].alias is empty"));
            let names_target = mapping.canonical_id.is_some()
                || mapping.canonical_name.as_deref().is_some_and(|n| !blank(n));
            require(
                names_target,
                format!("alias_mappings[{i}] names no canonical character"),
            );
        }

        for (i, update) in self.dossier_updates.iter().enumerate() {
            require(!blank(&update.character), format!("dossier_updates[{i}].character is empty"));
        }

        for (i, interaction) in self.interactions.iter().enumerate() {
            require(!blank(&interaction.character_a), format!("interactions[{i}].character_a is empty"));
            require(!blank(&interaction.character_b), format!("interactions[{i}].character_b is empty"));
            require(
                char_len(&interaction.relation_type) >= config.min_relation_type_len,
                format!(
                    "interactions[{i}].relation_type is shorter than {} characters",
                    config.min_relation_type_len
                ),
            );
            require(!blank(&interaction.reasoning), format!("interactions[{i}].reasoning is empty"));
            require(!blank(&interaction.context), format!("interactions[{i}].context is empty"));
            require(
                char_len(&interaction.quote) >= config.min_quote_len,
                format!(
                    "interactions[{i}].quote is shorter than {} characters",
                    config.min_quote_len
                ),
            );
        }

        for (i, event) in self.events.iter().enumerate() {
            require(!blank(&event.description), format!("events[{i}].description is empty"));
            require(!blank(&event.quote), format!("events[{i}].quote is empty"));
        }

        for (i, link) in self.causal_links.iter().enumerate() {
            require(
                link.interaction.is_some() || link.event.is_some(),
                format!("causal_links[{i}] names no effect"),
            );
            if let Some(target) = link.interaction {
                require(
                    target < self.interactions.len(),
                    format!("causal_links[{i}].interaction {target} is out of range"),
                );
            }
            if let Some(target) = link.event {
                require(
                    target < self.events.len(),
                    format!("causal_links[{i}].event {target} is out of range"),
                );
            }
        }

        if problems.is_empty() {
            Ok(ValidatedBatch(self))
        } else {
            Err(MalformedFactBatch {
                chapter: self.chapter_index,
                problems,
            })
        }
    }
}

fn blank(value: &str) -> bool {
    value.trim().is_empty()
}

fn char_len(value: &str) -> usize {
    value.trim().chars().count()
}

/// A fact batch that passed validation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ValidatedBatch(FactBatch);

impl ValidatedBatch {
    /// Unwrap the batch.
    pub fn into_inner(self) -> FactBatch {
        self.0
    }
}

impl Deref for ValidatedBatch {
    type Target = FactBatch;

    fn deref(&self) -> &FactBatch {
        &self.0
    }
}
