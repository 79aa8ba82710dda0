//! Steps 3 and 4: the event chronicle, causal links and node resolution.

use super::{MergeError, MergeReport, MergeWarning};
use crate::facts::ValidatedBatch;
use crate::graph::{EventId, EventLink, GraphError, GraphStore, InteractionId, Missing, SignificantEvent};
use tracing::debug;

/// Append this chapter's events, returning the stored id for every
/// candidate position.
pub(super) fn append_events(
    graph: &mut GraphStore,
    batch: &ValidatedBatch,
    report: &mut MergeReport,
) -> Result<Vec<Option<EventId>>, MergeError> {
    let mut stored = Vec::with_capacity(batch.events.len());
    for candidate in &batch.events {
        let description = candidate.description.trim();
        if let Some(existing) = graph.find_event(batch.chapter_index, description) {
            report.events_skipped += 1;
            stored.push(Some(existing.id));
            continue;
        }

        let mut involved = Vec::new();
        for name in &candidate.involved {
            match graph.lookup_character(name) {
                Some(id) if !involved.contains(&id) => involved.push(id),
                Some(_) => {}
                None => report.warn(MergeWarning::UnresolvedCharacter {
                    name: name.trim().to_string(),
                    context: "event participant",
                }),
            }
        }

        let event = SignificantEvent {
            id: EventId::new(),
            chapter_index: batch.chapter_index,
            chapter_title: batch.chapter_title.clone(),
            description: description.to_string(),
            involved_characters: involved,
            evidence_quote: candidate.quote.trim().to_string(),
            significance: candidate.significance,
        };
        let id = graph.add_event(event).map_err(|e| report.fail(e))?;
        report.events_added.push(id);
        stored.push(Some(id));
    }
    Ok(stored)
}

/// Attach causal links to the interactions and events they explain.
pub(super) fn link(
    graph: &mut GraphStore,
    batch: &ValidatedBatch,
    interactions: &[Option<InteractionId>],
    events: &[Option<EventId>],
    report: &mut MergeReport,
) -> Result<(), MergeError> {
    for candidate in &batch.causal_links {
        let past = candidate.past_event;
        if graph.event(past).is_none() {
            report.warn(MergeWarning::UnknownEventReference(past));
            continue;
        }

        if let Some(position) = candidate.interaction {
            match interactions.get(position).copied().flatten() {
                Some(id) => match graph.annotate_causal(id, past, &candidate.reasoning) {
                    Ok(true) => report.causal_links += 1,
                    Ok(false) => debug!(chapter = report.chapter, %past, "Causal link already recorded"),
                    Err(GraphError::CausalReferenceTaken { interaction, existing }) => {
                        report.warn(MergeWarning::CausalLinkConflict {
                            interaction,
                            kept: existing,
                            rejected: past,
                        });
                    }
                    Err(e) => return Err(report.fail(e)),
                },
                None => debug!(chapter = report.chapter, position, "Causal link target interaction was dropped"),
            }
        }

        if let Some(position) = candidate.event {
            match events.get(position).copied().flatten() {
                Some(target) if target != past => {
                    let added = graph
                        .add_event_link(EventLink {
                            source: past,
                            target,
                            reasoning: candidate.reasoning.trim().to_string(),
                            past_quote: candidate.past_quote.trim().to_string(),
                            current_quote: candidate.current_quote.trim().to_string(),
                        })
                        .map_err(|e| report.fail(e))?;
                    if added {
                        report.event_links_added += 1;
                    }
                }
                Some(_) => debug!(chapter = report.chapter, %past, "Ignoring event linked to itself"),
                None => debug!(chapter = report.chapter, position, "Causal link target event was dropped"),
            }
        }
    }
    Ok(())
}

/// Close the causal nodes that stored interactions claim to resolve.
pub(super) fn resolve_nodes(
    graph: &mut GraphStore,
    batch: &ValidatedBatch,
    interactions: &[Option<InteractionId>],
    report: &mut MergeReport,
) -> Result<(), MergeError> {
    for (candidate, stored) in batch.interactions.iter().zip(interactions) {
        let (Some(node), Some(_)) = (candidate.resolves_causal_node, stored) else {
            continue;
        };
        match graph.mark_resolved(node, batch.chapter_index) {
            Ok(()) => report.resolutions += 1,
            Err(GraphError::NotFound(Missing::OpenCausalNode(id))) => {
                report.warn(MergeWarning::CausalNodeNotOpen(id));
            }
            Err(e) => return Err(report.fail(e)),
        }
    }
    Ok(())
}
