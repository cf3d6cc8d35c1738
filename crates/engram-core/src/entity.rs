use crate::{CoreError, EntityId, MetadataBag, MetadataValue, NounType, RelationshipId, Result, VerbType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata keys the engine maintains itself. User-supplied values under
/// these keys are stripped on write; the indexed view re-synthesises them.
pub const RESERVED_KEYS: [&str; 4] = ["noun", "createdAt", "updatedAt", "service"];

/// An entity (noun): the primary data unit. The embedding vector lives in a
/// sibling blob and is never part of the metadata record, so metadata-only
/// reads never pay the vector I/O cost.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    pub id: EntityId,
    pub noun: NounType,
    /// Primary data string; feeds the word index when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default)]
    pub metadata: MetadataBag,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    /// Populated only when the caller asked for the vector.
    #[serde(skip)]
    pub vector: Option<Vec<f32>>,
}

impl Entity {
    /// The metadata bag as seen by filters and the metadata index: the
    /// user bag plus the engine-maintained reserved keys.
    pub fn indexed_metadata(&self) -> MetadataBag {
        let mut bag = self.metadata.clone();
        bag.insert("noun".into(), MetadataValue::String(self.noun.as_str().into()));
        bag.insert("createdAt".into(), MetadataValue::Timestamp(self.created_at));
        bag.insert("updatedAt".into(), MetadataValue::Timestamp(self.updated_at));
        if let Some(service) = &self.service {
            bag.insert("service".into(), MetadataValue::String(service.clone()));
        }
        bag
    }
}

/// Caller-supplied input for `add`. Timestamps and the definitive id are
/// assigned by the engine.
#[derive(Debug, Clone, Default)]
pub struct EntityDraft {
    pub id: Option<EntityId>,
    pub data: Option<String>,
    pub vector: Option<Vec<f32>>,
    pub metadata: MetadataBag,
    pub service: Option<String>,
}

impl EntityDraft {
    pub fn with_vector(vector: Vec<f32>) -> Self {
        Self { vector: Some(vector), ..Default::default() }
    }

    pub fn with_data(data: impl Into<String>) -> Self {
        Self { data: Some(data.into()), ..Default::default() }
    }

    pub fn metadata(mut self, metadata: MetadataBag) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn id(mut self, id: EntityId) -> Self {
        self.id = Some(id);
        self
    }

    /// Drop engine-maintained keys from the user bag. Returns the keys that
    /// were removed so the caller can log them.
    pub fn strip_reserved_keys(&mut self) -> Vec<String> {
        let mut stripped = Vec::new();
        for key in RESERVED_KEYS {
            if self.metadata.remove(key).is_some() {
                stripped.push(key.to_string());
            }
        }
        stripped
    }
}

/// A relationship (verb): a typed directed edge between two entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Relationship {
    pub id: RelationshipId,
    pub from: EntityId,
    pub to: EntityId,
    pub verb: VerbType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f32>,
    #[serde(default, skip_serializing_if = "MetadataBag::is_empty")]
    pub metadata: MetadataBag,
    pub created_at: DateTime<Utc>,
}

impl Relationship {
    /// Self-loops are forbidden and weights live in [0, 1].
    pub fn validate(&self) -> Result<()> {
        if self.from == self.to {
            return Err(CoreError::validation(
                "to",
                format!("self-loop relationships are forbidden ({})", self.from),
            ));
        }
        if let Some(w) = self.weight {
            if !(0.0..=1.0).contains(&w) || !w.is_finite() {
                return Err(CoreError::validation(
                    "weight",
                    format!("weight must be within [0, 1], got {w}"),
                ));
            }
        }
        Ok(())
    }
}

/// Caller-supplied input for `relate`.
#[derive(Debug, Clone)]
pub struct RelationshipDraft {
    pub from: EntityId,
    pub to: EntityId,
    pub verb: VerbType,
    pub weight: Option<f32>,
    pub metadata: MetadataBag,
}

impl RelationshipDraft {
    pub fn new(from: EntityId, to: EntityId, verb: VerbType) -> Self {
        Self { from, to, verb, weight: None, metadata: MetadataBag::new() }
    }

    pub fn weight(mut self, weight: f32) -> Self {
        self.weight = Some(weight);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(noun: NounType) -> Entity {
        Entity {
            id: EntityId::new(),
            noun,
            data: None,
            metadata: MetadataBag::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            service: None,
            vector: None,
        }
    }

    #[test]
    fn reserved_keys_are_stripped_from_drafts() {
        let mut draft = EntityDraft::with_data("hello");
        draft.metadata.insert("noun".into(), "person".into());
        draft.metadata.insert("year".into(), 2024.into());
        let stripped = draft.strip_reserved_keys();
        assert_eq!(stripped, vec!["noun".to_string()]);
        assert!(draft.metadata.contains_key("year"));
    }

    #[test]
    fn indexed_metadata_synthesises_reserved_keys() {
        let mut e = entity(NounType::Document);
        e.metadata.insert("year".into(), 2024.into());
        let bag = e.indexed_metadata();
        assert_eq!(bag.get("noun"), Some(&MetadataValue::String("document".into())));
        assert!(matches!(bag.get("createdAt"), Some(MetadataValue::Timestamp(_))));
        assert_eq!(bag.get("year"), Some(&MetadataValue::Int(2024)));
    }

    #[test]
    fn self_loops_are_rejected() {
        let id = EntityId::new();
        let rel = Relationship {
            id: RelationshipId::new(),
            from: id,
            to: id,
            verb: VerbType::RelatedTo,
            weight: None,
            metadata: MetadataBag::new(),
            created_at: Utc::now(),
        };
        assert!(rel.validate().is_err());
    }

    #[test]
    fn out_of_range_weights_are_rejected() {
        let rel = Relationship {
            id: RelationshipId::new(),
            from: EntityId::new(),
            to: EntityId::new(),
            verb: VerbType::Owns,
            weight: Some(1.5),
            metadata: MetadataBag::new(),
            created_at: Utc::now(),
        };
        assert!(rel.validate().is_err());
    }

    #[test]
    fn entity_json_excludes_vector() {
        let mut e = entity(NounType::Note);
        e.vector = Some(vec![0.1; 4]);
        let json = serde_json::to_string(&e).unwrap();
        assert!(!json.contains("vector"));
        let back: Entity = serde_json::from_str(&json).unwrap();
        assert_eq!(back.vector, None);
        assert_eq!(back.id, e.id);
    }
}
