//! Knowledge graph data model.
//!
//! - [`CharacterProfile`]: one canonical identity per character, reachable by
//!   any of its aliases
//! - [`RelationshipHistory`]: the append-only, chapter-ordered interactions of
//!   one pair of characters
//! - [`SignificantEvent`]: chronicle entries that later facts refer back to
//! - [`GraphStore`]: the container that enforces the invariants between them

mod character;
mod event;
mod relationship;
mod store;

pub use character::{normalize_alias, CharacterId, CharacterProfile, DossierPatch};
pub use event::{EventId, EventLink, Significance, SignificantEvent};
pub use relationship::{
    InteractionId, PairKey, ParsePairKeyError, RelationshipEvidence, RelationshipHistory,
    RelationshipInteraction,
};
pub use store::{GraphError, GraphStore, Missing};
