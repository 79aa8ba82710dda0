//! Merge engine: folds one validated fact batch into a new graph snapshot.
//!
//! Steps run in a fixed order so later facts can rely on earlier ones:
//!
//! 1. characters: new profiles and alias bindings, then dossier updates
//! 2. relationship interactions
//! 3. chronicle events
//! 4. causal links, then causal node resolutions
//!
//! Violations confined to a single fact are recovered and reported as
//! [`MergeWarning`]s. Anything else aborts the merge and the input snapshot
//! stays the only valid one.

mod causal;
mod characters;
mod relationships;

use crate::facts::ValidatedBatch;
use crate::graph::{CharacterId, EventId, GraphError, GraphStore, InteractionId};
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, warn};

/// A locally recovered violation. The offending fact was skipped.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MergeWarning {
    #[error("alias '{alias}' is already bound to {existing}; new binding rejected")]
    AliasConflict {
        alias: String,
        existing: CharacterId,
        claimed: Option<CharacterId>,
    },

    #[error("no character named '{name}' ({context})")]
    UnresolvedCharacter { name: String, context: &'static str },

    #[error("unknown character {0}")]
    UnknownCharacter(CharacterId),

    #[error("'{name}' cannot have a relationship with itself")]
    SelfInteraction { name: String },

    #[error("interaction between '{a}' and '{b}' from chapter {chapter} is older than the history tail (chapter {tail}); dropped")]
    OutOfOrderInteraction {
        a: String,
        b: String,
        chapter: u32,
        tail: u32,
    },

    #[error("causal link references unknown event {0}; skipped")]
    UnknownEventReference(EventId),

    #[error("causal node {0} does not exist or is already resolved")]
    CausalNodeNotOpen(InteractionId),

    #[error("interaction {interaction} already descends from event {kept}; link to {rejected} skipped")]
    CausalLinkConflict {
        interaction: InteractionId,
        kept: EventId,
        rejected: EventId,
    },
}

/// A merge that hit an unrecoverable store failure.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("merging chapter {chapter} failed: {source}")]
pub struct MergeError {
    pub chapter: u32,
    #[source]
    pub source: GraphError,
}

/// What a merge did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeReport {
    pub chapter: u32,
    pub warnings: Vec<MergeWarning>,
    pub characters_created: Vec<CharacterId>,
    pub aliases_added: usize,
    pub dossiers_updated: usize,
    pub interactions_added: Vec<InteractionId>,
    pub interactions_skipped: usize,
    pub events_added: Vec<EventId>,
    pub events_skipped: usize,
    pub causal_links: usize,
    pub event_links_added: usize,
    pub resolutions: usize,
}

impl MergeReport {
    fn new(chapter: u32) -> Self {
        Self {
            chapter,
            ..Default::default()
        }
    }

    fn warn(&mut self, warning: MergeWarning) {
        warn!(chapter = self.chapter, %warning, "Recovered merge violation");
        self.warnings.push(warning);
    }

    fn fail(&self, source: GraphError) -> MergeError {
        MergeError {
            chapter: self.chapter,
            source,
        }
    }

    /// Whether the batch added nothing new.
    pub fn is_noop(&self) -> bool {
        self.characters_created.is_empty()
            && self.aliases_added == 0
            && self.interactions_added.is_empty()
            && self.events_added.is_empty()
            && self.event_links_added == 0
            && self.resolutions == 0
    }
}

/// The new snapshot plus what went into it.
#[derive(Debug, Clone)]
pub struct MergeOutput {
    pub graph: GraphStore,
    pub report: MergeReport,
}

/// Stateless entry point of the merge engine.
pub struct MergeEngine;

impl MergeEngine {
    /// Merge a batch, stamping new interactions with the current time.
    pub fn merge(graph: &GraphStore, batch: &ValidatedBatch) -> Result<MergeOutput, MergeError> {
        Self::merge_at(graph, batch, Utc::now())
    }

    /// Merge a batch with an explicit recording time.
    ///
    /// Works on a copy-on-write clone; `graph` is never modified.
    pub fn merge_at(
        graph: &GraphStore,
        batch: &ValidatedBatch,
        now: DateTime<Utc>,
    ) -> Result<MergeOutput, MergeError> {
        let mut next = graph.clone();
        let mut report = MergeReport::new(batch.chapter_index);

        characters::resolve(&mut next, batch, &mut report)?;
        characters::apply_dossiers(&mut next, batch, &mut report)?;
        let interactions = relationships::ingest(&mut next, batch, now, &mut report)?;
        let events = causal::append_events(&mut next, batch, &mut report)?;
        causal::link(&mut next, batch, &interactions, &events, &mut report)?;
        causal::resolve_nodes(&mut next, batch, &interactions, &mut report)?;

        debug!(
            chapter = report.chapter,
            created = report.characters_created.len(),
            interactions = report.interactions_added.len(),
            events = report.events_added.len(),
            warnings = report.warnings.len(),
            "Merged fact batch"
        );
        Ok(MergeOutput {
            graph: next,
            report,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::facts::{CandidateCausalLink, CandidateEvent, CandidateInteraction, FactBatch};
    use crate::graph::Significance;

    fn validated(batch: FactBatch) -> ValidatedBatch {
        batch.validate(&EngineConfig::default()).unwrap()
    }

    fn interaction(a: &str, b: &str, label: &str, quote: &str) -> CandidateInteraction {
        CandidateInteraction {
            character_a: a.into(),
            character_b: b.into(),
            relation_type: label.into(),
            reasoning: "Reasoning for the bond".into(),
            context: "Context of the meeting".into(),
            quote: quote.into(),
            is_causal_node: false,
            resolves_causal_node: None,
            causal_reasoning: None,
        }
    }

    fn event(description: &str, involved: &[&str]) -> CandidateEvent {
        CandidateEvent {
            description: description.into(),
            involved: involved.iter().map(|s| s.to_string()).collect(),
            quote: "The quote for this event".into(),
            significance: Significance::Major,
        }
    }

    #[test]
    fn test_merge_does_not_touch_input() {
        let graph = GraphStore::new();
        let batch = validated(
            FactBatch::new(0, "CHAPTER I", "Pierre arrives.").with_character("Pierre", "A large young man"),
        );
        let output = MergeEngine::merge(&graph, &batch).unwrap();
        assert_eq!(graph.character_count(), 0);
        assert_eq!(output.graph.character_count(), 1);
        assert_eq!(output.report.characters_created.len(), 1);
    }

    #[test]
    fn test_alias_conflict_keeps_first_binding() {
        let batch = validated(
            FactBatch::new(0, "CHAPTER I", "Two princes.")
                .with_character("Andrew", "")
                .with_character("Vasili", "")
                .with_alias("the prince", "Andrew")
                .with_alias("the prince", "Vasili"),
        );
        let output = MergeEngine::merge(&GraphStore::new(), &batch).unwrap();
        let andrew = output.graph.lookup_character("Andrew").unwrap();

        assert_eq!(output.graph.lookup_character("The Prince"), Some(andrew));
        assert_eq!(output.report.warnings.len(), 1);
        assert!(matches!(
            &output.report.warnings[0],
            MergeWarning::AliasConflict { existing, .. } if *existing == andrew
        ));
    }

    #[test]
    fn test_existing_new_character_is_merged_not_duplicated() {
        let first = validated(FactBatch::new(0, "CHAPTER I", "Intro.").with_character("Pierre", ""));
        let graph = MergeEngine::merge(&GraphStore::new(), &first).unwrap().graph;

        let mut second = FactBatch::new(1, "CHAPTER II", "Again.");
        second.new_characters.push(crate::facts::NewCharacter {
            name: "pierre".into(),
            aliases: vec!["Bezukhov".into()],
            description: String::new(),
        });
        let output = MergeEngine::merge(&graph, &validated(second)).unwrap();

        assert_eq!(output.graph.character_count(), 1);
        let pierre = output.graph.character_by_name("Bezukhov").unwrap();
        assert_eq!(pierre.canonical_name, "Pierre");
        assert_eq!(pierre.first_appearance_chapter, 0);
    }

    #[test]
    fn test_unresolved_names_are_warnings() {
        let batch = validated(
            FactBatch::new(0, "CHAPTER I", "Strangers.")
                .with_character("Pierre", "")
                .with_interaction(interaction("Pierre", "Nobody", "Strangers", "Who is this man, then?"))
                .with_event(event("A stranger appears", &["Pierre", "Nobody"])),
        );
        let output = MergeEngine::merge(&GraphStore::new(), &batch).unwrap();

        assert_eq!(output.graph.interaction_count(), 0);
        assert_eq!(output.graph.event_count(), 1);
        let event = output.graph.events().next().unwrap();
        assert_eq!(event.involved_characters.len(), 1);
        assert_eq!(output.report.warnings.len(), 2);
    }

    #[test]
    fn test_self_interaction_is_dropped() {
        let batch = validated(
            FactBatch::new(0, "CHAPTER I", "Musing.")
                .with_character("Pierre", "")
                .with_alias("Bezukhov", "Pierre")
                .with_interaction(interaction("Pierre", "Bezukhov", "Self doubt", "He wondered about himself")),
        );
        let output = MergeEngine::merge(&GraphStore::new(), &batch).unwrap();
        assert_eq!(output.graph.interaction_count(), 0);
        assert_eq!(
            output.report.warnings,
            vec![MergeWarning::SelfInteraction {
                name: "Bezukhov".into()
            }]
        );
    }

    #[test]
    fn test_reapplying_batch_is_idempotent() {
        let batch = validated(
            FactBatch::new(2, "CHAPTER III", "The ferry.")
                .with_character("Pierre", "")
                .with_character("Andrew", "")
                .with_alias("Bezukhov", "Pierre")
                .with_interaction(interaction("Pierre", "Andrew", "Friends", "They talked on the ferry all evening"))
                .with_event(event("Conversation on the ferry", &["Pierre", "Andrew"])),
        );
        let once = MergeEngine::merge(&GraphStore::new(), &batch).unwrap();
        let twice = MergeEngine::merge(&once.graph, &batch).unwrap();

        assert_eq!(twice.graph.character_count(), 2);
        assert_eq!(twice.graph.interaction_count(), 1);
        assert_eq!(twice.graph.event_count(), 1);
        assert_eq!(twice.graph.character_by_name("Pierre").unwrap().aliases, vec!["Bezukhov"]);
        assert!(twice.report.is_noop());
        assert_eq!(twice.report.interactions_skipped, 1);
        assert_eq!(twice.report.events_skipped, 1);
        assert!(twice.graph.check_invariants().is_ok());
    }

    #[test]
    fn test_unknown_event_reference_skips_link() {
        let batch = validated(
            FactBatch::new(3, "CHAPTER IV", "Echoes.")
                .with_character("Pierre", "")
                .with_character("Helene", "")
                .with_interaction(interaction("Pierre", "Helene", "Married", "They were married in the end"))
                .with_causal_link(CandidateCausalLink {
                    past_event: EventId::new(),
                    interaction: Some(0),
                    event: None,
                    reasoning: "Echo of an old promise".into(),
                    past_quote: String::new(),
                    current_quote: String::new(),
                }),
        );
        let output = MergeEngine::merge(&GraphStore::new(), &batch).unwrap();

        assert_eq!(output.graph.interaction_count(), 1);
        assert!(output.graph.active_causal_nodes().is_empty());
        assert!(matches!(
            output.report.warnings.as_slice(),
            [MergeWarning::UnknownEventReference(_)]
        ));
    }

    #[test]
    fn test_event_to_event_link() {
        let first = validated(
            FactBatch::new(0, "CHAPTER I", "A vow.")
                .with_character("Nicholas", "")
                .with_event(event("Nicholas vows to marry Sonya", &["Nicholas"])),
        );
        let graph = MergeEngine::merge(&GraphStore::new(), &first).unwrap().graph;
        let vow = graph.events().next().unwrap().id;

        let second = validated(
            FactBatch::new(9, "CHAPTER X", "The vow is broken.")
                .with_event(event("Nicholas releases Sonya", &["Nicholas"]))
                .with_causal_link(CandidateCausalLink {
                    past_event: vow,
                    interaction: None,
                    event: Some(0),
                    reasoning: "The release undoes the vow".into(),
                    past_quote: "I will marry her".into(),
                    current_quote: "You are free".into(),
                }),
        );
        let output = MergeEngine::merge(&graph, &second).unwrap();
        assert_eq!(output.report.event_links_added, 1);
        let link = &output.graph.event_links()[0];
        assert_eq!(link.source, vow);
        assert_eq!(Some(link.target), output.report.events_added.first().copied());
    }

    fn link_to_interaction(past_event: EventId, quote: &str) -> CandidateCausalLink {
        CandidateCausalLink {
            past_event,
            interaction: Some(0),
            event: None,
            reasoning: "An earlier event drives this one".into(),
            past_quote: quote.into(),
            current_quote: "Do not speak to me of it".into(),
        }
    }

    #[test]
    fn test_second_link_to_same_interaction_is_refused() {
        let first = validated(
            FactBatch::new(0, "CHAPTER I", "Two quarrels.")
                .with_character("Pierre", "")
                .with_character("Helene", "")
                .with_event(event("Helene flirts with Dolokhov", &["Helene"]))
                .with_event(event("Pierre reads the anonymous letter", &["Pierre"])),
        );
        let graph = MergeEngine::merge(&GraphStore::new(), &first).unwrap().graph;
        let ids: Vec<EventId> = graph.events().map(|e| e.id).collect();
        let (flirt, letter) = (ids[0], ids[1]);

        let second = validated(
            FactBatch::new(1, "CHAPTER II", "The separation.")
                .with_interaction(interaction("Pierre", "Helene", "Separated", "Do not speak to me of it"))
                .with_causal_link(link_to_interaction(flirt, "She laughed at his jokes"))
                .with_causal_link(link_to_interaction(letter, "Your wife is deceiving you")),
        );
        let output = MergeEngine::merge(&graph, &second).unwrap();

        let stored = output.graph.interaction(output.report.interactions_added[0]).unwrap();
        assert_eq!(stored.references_event, Some(flirt));
        assert_eq!(output.report.causal_links, 1);
        assert_eq!(
            output.report.warnings,
            vec![MergeWarning::CausalLinkConflict {
                interaction: stored.id,
                kept: flirt,
                rejected: letter,
            }]
        );
    }

    #[test]
    fn test_repeated_link_to_same_event_counts_once() {
        let first = validated(
            FactBatch::new(0, "CHAPTER I", "A letter.")
                .with_character("Pierre", "")
                .with_character("Helene", "")
                .with_event(event("Pierre reads the anonymous letter", &["Pierre"])),
        );
        let graph = MergeEngine::merge(&GraphStore::new(), &first).unwrap().graph;
        let letter = graph.events().next().unwrap().id;

        let second = validated(
            FactBatch::new(1, "CHAPTER II", "The separation.")
                .with_interaction(interaction("Pierre", "Helene", "Separated", "Do not speak to me of it"))
                .with_causal_link(link_to_interaction(letter, "Your wife is deceiving you"))
                .with_causal_link(link_to_interaction(letter, "Your wife is deceiving you")),
        );
        let output = MergeEngine::merge(&graph, &second).unwrap();
        assert_eq!(output.report.causal_links, 1);
        assert!(output.report.warnings.is_empty());
    }

    #[test]
    fn test_resolving_closed_node_warns_and_keeps_first_resolution() {
        let opening = validated(
            FactBatch::new(0, "CHAPTER I", "The insult.")
                .with_character("Pierre", "")
                .with_character("Dolokhov", "")
                .with_interaction(CandidateInteraction {
                    is_causal_node: true,
                    ..interaction("Dolokhov", "Pierre", "Rivals", "Dolokhov smiled insolently at him")
                }),
        );
        let graph = MergeEngine::merge(&GraphStore::new(), &opening).unwrap().graph;
        let node = graph.active_causal_nodes()[0].id;

        let resolving = |chapter: u32, label: &str| {
            validated(FactBatch::new(chapter, format!("CHAPTER {chapter}"), "The duel.").with_interaction(
                CandidateInteraction {
                    resolves_causal_node: Some(node),
                    causal_reasoning: Some("The duel settles the insult".into()),
                    ..interaction("Pierre", "Dolokhov", label, "Pierre fired without aiming")
                },
            ))
        };

        let graph = MergeEngine::merge(&graph, &resolving(4, "Duelists")).unwrap().graph;
        assert_eq!(graph.interaction(node).unwrap().resolved_in_chapter, Some(4));

        let output = MergeEngine::merge(&graph, &resolving(6, "Estranged")).unwrap();
        assert_eq!(output.report.resolutions, 0);
        assert_eq!(output.report.warnings, vec![MergeWarning::CausalNodeNotOpen(node)]);
        assert_eq!(output.graph.interaction(node).unwrap().resolved_in_chapter, Some(4));
        assert_eq!(output.graph.interaction_count(), 3);
    }
}
