use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crowd_store::{Document, ID_FIELD};
use crowd_types::EntityId;

/// Name of the identity field on the entity side of the mapping.
pub const ENTITY_ID_FIELD: &str = "id";

/// Failure converting between a document and an entity.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MappingError {
    #[error("expected a JSON object, got {0}")]
    NotAnObject(String),

    #[error("{0}")]
    Serde(String),
}

/// Everything a [`crate::Repository`] needs to know about one entity kind.
///
/// `encode` and `decode` must be inverse on the fields they carry, and must
/// translate the identity between the entity's `id` and the document's
/// `_id`.
pub trait EntityDescriptor: Send + Sync + 'static {
    type Entity: Clone + Send + Sync + 'static;

    /// Collection holding this kind.
    const COLLECTION: &'static str;

    /// Fields whose values may appear in at most one document.
    const UNIQUE_FIELDS: &'static [&'static str] = &[];

    fn encode(entity: &Self::Entity) -> Result<Document, MappingError>;

    fn decode(document: Document) -> Result<Self::Entity, MappingError>;

    fn id(entity: &Self::Entity) -> Option<EntityId>;

    fn set_id(entity: &mut Self::Entity, id: EntityId);
}

/// Entity kinds with a natural key: a domain field identifying the real
/// world subject independently of the store id.
pub trait NaturalKey: EntityDescriptor {
    /// Document field holding the key.
    const KEY_FIELD: &'static str;

    fn natural_key(entity: &Self::Entity) -> Value;
}

/// Encode through the entity's `Serialize` impl, moving `id` to `_id`.
///
/// An absent or null id is left out, so the store assigns one.
pub fn encode_with_serde<T: Serialize>(entity: &T) -> Result<Document, MappingError> {
    let value = serde_json::to_value(entity).map_err(|e| MappingError::Serde(e.to_string()))?;
    let Value::Object(mut document) = value else {
        return Err(MappingError::NotAnObject(kind_of(&value).into()));
    };
    match document.remove(ENTITY_ID_FIELD) {
        Some(Value::Null) | None => {}
        Some(id) => {
            document.insert(ID_FIELD.into(), id);
        }
    }
    Ok(document)
}

/// Decode through the entity's `Deserialize` impl, moving `_id` to `id`.
pub fn decode_with_serde<T: DeserializeOwned>(mut document: Document) -> Result<T, MappingError> {
    if let Some(id) = document.remove(ID_FIELD) {
        document.insert(ENTITY_ID_FIELD.into(), id);
    }
    serde_json::from_value(Value::Object(document)).map_err(|e| MappingError::Serde(e.to_string()))
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Item {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<EntityId>,
        label: String,
    }

    #[test]
    fn encode_moves_id() {
        let id = EntityId::from_parts(3, [1; 5], 7);
        let doc = encode_with_serde(&Item {
            id: Some(id),
            label: "x".into(),
        })
        .unwrap();
        assert_eq!(doc.get("_id"), Some(&json!(id.to_hex())));
        assert!(doc.get("id").is_none());
    }

    #[test]
    fn encode_without_id_leaves_it_out() {
        let doc = encode_with_serde(&Item {
            id: None,
            label: "x".into(),
        })
        .unwrap();
        assert!(doc.get("_id").is_none());
        assert_eq!(doc.len(), 1);
    }

    #[test]
    fn encode_rejects_non_objects() {
        assert_eq!(
            encode_with_serde(&5),
            Err(MappingError::NotAnObject("a number".into()))
        );
    }

    #[test]
    fn decode_moves_id_back() {
        let id = EntityId::from_parts(3, [1; 5], 7);
        let doc = json!({ "_id": id.to_hex(), "label": "y" }).as_object().cloned().unwrap();
        let item: Item = decode_with_serde(doc).unwrap();
        assert_eq!(item, Item { id: Some(id), label: "y".into() });
    }

    #[test]
    fn decode_reports_bad_documents() {
        let doc = json!({ "_id": "zz", "label": "y" }).as_object().cloned().unwrap();
        assert!(matches!(
            decode_with_serde::<Item>(doc),
            Err(MappingError::Serde(_))
        ));
        let doc = json!({ "label": 4 }).as_object().cloned().unwrap();
        assert!(decode_with_serde::<Item>(doc).is_err());
    }
}
