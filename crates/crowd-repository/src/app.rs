use crowd_store::Document;
use crowd_types::{App, EntityId};

use crate::mapping::{decode_with_serde, encode_with_serde, EntityDescriptor, MappingError};
use crate::repository::Repository;

/// Descriptor for [`App`]s, stored in the `App` collection.
pub struct AppDescriptor;

impl EntityDescriptor for AppDescriptor {
    type Entity = App;

    const COLLECTION: &'static str = "App";

    fn encode(entity: &App) -> Result<Document, MappingError> {
        encode_with_serde(entity)
    }

    fn decode(document: Document) -> Result<App, MappingError> {
        decode_with_serde(document)
    }

    fn id(entity: &App) -> Option<EntityId> {
        entity.id
    }

    fn set_id(entity: &mut App, id: EntityId) {
        entity.id = Some(id);
    }
}

/// Repository of [`App`]s.
pub type AppRepository = Repository<AppDescriptor>;
