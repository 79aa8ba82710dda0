//! Step 2: relationship interactions.

use super::{MergeError, MergeReport, MergeWarning};
use crate::facts::{CandidateInteraction, ValidatedBatch};
use crate::graph::{
    CharacterId, GraphError, GraphStore, InteractionId, RelationshipEvidence,
    RelationshipInteraction,
};
use chrono::{DateTime, Utc};

/// Append each candidate to its pair's history.
///
/// Returns the stored id for every candidate position, `None` where the
/// candidate was dropped. A candidate repeating a stored fact maps to the
/// stored id.
pub(super) fn ingest(
    graph: &mut GraphStore,
    batch: &ValidatedBatch,
    now: DateTime<Utc>,
    report: &mut MergeReport,
) -> Result<Vec<Option<InteractionId>>, MergeError> {
    let mut stored = Vec::with_capacity(batch.interactions.len());
    for candidate in &batch.interactions {
        stored.push(ingest_one(graph, batch, candidate, now, report)?);
    }
    Ok(stored)
}

fn ingest_one(
    graph: &mut GraphStore,
    batch: &ValidatedBatch,
    candidate: &CandidateInteraction,
    now: DateTime<Utc>,
    report: &mut MergeReport,
) -> Result<Option<InteractionId>, MergeError> {
    let a = resolve(graph, &candidate.character_a, report);
    let b = resolve(graph, &candidate.character_b, report);
    let (Some(a), Some(b)) = (a, b) else {
        return Ok(None);
    };
    if a == b {
        report.warn(MergeWarning::SelfInteraction {
            name: candidate.character_b.clone(),
        });
        return Ok(None);
    }

    let interaction = RelationshipInteraction {
        id: InteractionId::new(),
        character_a: a,
        character_b: b,
        relation_type: candidate.relation_type.trim().to_string(),
        reasoning: candidate.reasoning.trim().to_string(),
        context: candidate.context.trim().to_string(),
        evidence: RelationshipEvidence {
            quote: candidate.quote.trim().to_string(),
            chapter_index: batch.chapter_index,
            chapter_title: batch.chapter_title.clone(),
        },
        recorded_at: now,
        is_causal_node: candidate.is_causal_node,
        resolved_in_chapter: None,
        references_event: None,
        causal_reasoning: candidate
            .causal_reasoning
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_string),
    };

    if let Some(existing) = graph
        .history(a, b)
        .and_then(|h| h.find_same_fact(&interaction))
    {
        report.interactions_skipped += 1;
        return Ok(Some(existing.id));
    }

    match graph.append_interaction(interaction) {
        Ok(id) => {
            report.interactions_added.push(id);
            Ok(Some(id))
        }
        Err(GraphError::OutOfOrderInteraction { chapter, tail }) => {
            report.warn(MergeWarning::OutOfOrderInteraction {
                a: candidate.character_a.clone(),
                b: candidate.character_b.clone(),
                chapter,
                tail,
            });
            Ok(None)
        }
        Err(e) => Err(report.fail(e)),
    }
}

fn resolve(graph: &GraphStore, name: &str, report: &mut MergeReport) -> Option<CharacterId> {
    let found = graph.lookup_character(name);
    if found.is_none() {
        report.warn(MergeWarning::UnresolvedCharacter {
            name: name.trim().to_string(),
            context: "relationship interaction",
        });
    }
    found
}
