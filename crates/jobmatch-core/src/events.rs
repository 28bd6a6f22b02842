use serde::{Deserialize, Serialize};

use crate::types::{Entity, EntityKind};

/// Change notifications emitted by the entity source.
///
/// Consumed by the matching service to keep the vector indexes in sync with
/// the source records. An upsert re-projects and re-embeds the entity; a
/// delete drops its vector.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
#[non_exhaustive]
pub enum EntityEvent {
    /// An entity was created or updated.
    Upserted { id: String, entity: Entity },

    /// An entity was deleted upstream.
    Deleted { id: String, kind: EntityKind },
}

impl EntityEvent {
    /// The external ID the event refers to.
    pub fn id(&self) -> &str {
        match self {
            EntityEvent::Upserted { id, .. } => id,
            EntityEvent::Deleted { id, .. } => id,
        }
    }

    /// The kind of entity the event refers to.
    pub fn kind(&self) -> EntityKind {
        match self {
            EntityEvent::Upserted { entity, .. } => entity.kind(),
            EntityEvent::Deleted { kind, .. } => *kind,
        }
    }
}
