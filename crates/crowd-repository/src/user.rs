use crowd_store::Document;
use crowd_types::{EntityId, User};

use crate::mapping::{decode_with_serde, encode_with_serde, EntityDescriptor, MappingError};
use crate::repository::Repository;

/// Descriptor for [`User`]s, stored in the `User` collection.
pub struct UserDescriptor;

impl EntityDescriptor for UserDescriptor {
    type Entity = User;

    const COLLECTION: &'static str = "User";

    fn encode(entity: &User) -> Result<Document, MappingError> {
        encode_with_serde(entity)
    }

    fn decode(document: Document) -> Result<User, MappingError> {
        decode_with_serde(document)
    }

    fn id(entity: &User) -> Option<EntityId> {
        entity.id
    }

    fn set_id(entity: &mut User, id: EntityId) {
        entity.id = Some(id);
    }
}

/// Repository of [`User`]s.
pub type UserRepository = Repository<UserDescriptor>;
