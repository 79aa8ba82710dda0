//! Step 1: identities. New profiles and alias bindings, then dossiers.

use super::{MergeError, MergeReport, MergeWarning};
use crate::facts::{AliasMapping, ValidatedBatch};
use crate::graph::{CharacterId, CharacterProfile, GraphError, GraphStore, Missing};
use tracing::debug;

pub(super) fn resolve(
    graph: &mut GraphStore,
    batch: &ValidatedBatch,
    report: &mut MergeReport,
) -> Result<(), MergeError> {
    for candidate in &batch.new_characters {
        let name = candidate.name.trim();
        let id = match graph.lookup_character(name) {
            Some(existing) => {
                debug!(chapter = report.chapter, name, %existing, "New character already known, merging");
                existing
            }
            None => {
                let profile = CharacterProfile::new(name, batch.chapter_index)
                    .with_description(candidate.description.trim());
                let id = graph.insert_profile(profile).map_err(|e| report.fail(e))?;
                report.characters_created.push(id);
                id
            }
        };
        for alias in &candidate.aliases {
            bind(graph, id, alias, report)?;
        }
    }

    for mapping in &batch.alias_mappings {
        if let Some(id) = target_of(graph, mapping, report) {
            bind(graph, id, &mapping.alias, report)?;
        }
    }
    Ok(())
}

pub(super) fn apply_dossiers(
    graph: &mut GraphStore,
    batch: &ValidatedBatch,
    report: &mut MergeReport,
) -> Result<(), MergeError> {
    for update in &batch.dossier_updates {
        let Some(id) = graph.lookup_character(&update.character) else {
            report.warn(MergeWarning::UnresolvedCharacter {
                name: update.character.clone(),
                context: "dossier update",
            });
            continue;
        };
        graph
            .apply_dossier(id, &update.patch)
            .map_err(|e| report.fail(e))?;
        report.dossiers_updated += 1;
    }
    Ok(())
}

/// Which existing character an alias mapping claims. An explicit id wins
/// over a name.
fn target_of(
    graph: &GraphStore,
    mapping: &AliasMapping,
    report: &mut MergeReport,
) -> Option<CharacterId> {
    if let Some(id) = mapping.canonical_id {
        if graph.character(id).is_some() {
            return Some(id);
        }
        report.warn(MergeWarning::UnknownCharacter(id));
        return None;
    }
    let name = mapping.canonical_name.as_deref().unwrap_or_default();
    let found = graph.lookup_character(name);
    if found.is_none() {
        report.warn(MergeWarning::UnresolvedCharacter {
            name: name.to_string(),
            context: "alias mapping",
        });
    }
    found
}

fn bind(
    graph: &mut GraphStore,
    id: CharacterId,
    alias: &str,
    report: &mut MergeReport,
) -> Result<(), MergeError> {
    match graph.record_alias(id, alias) {
        Ok(true) => {
            report.aliases_added += 1;
            Ok(())
        }
        Ok(false) => Ok(()),
        Err(GraphError::AliasConflict { alias, existing }) => {
            report.warn(MergeWarning::AliasConflict {
                alias,
                existing,
                claimed: Some(id),
            });
            Ok(())
        }
        Err(GraphError::NotFound(Missing::Character(unknown))) => {
            report.warn(MergeWarning::UnknownCharacter(unknown));
            Ok(())
        }
        Err(e) => Err(report.fail(e)),
    }
}
