use serde_json::Value;

use crowd_store::{Document, Filter};
use crowd_types::{EntityId, Profile};

use crate::error::RepositoryResult;
use crate::mapping::{decode_with_serde, encode_with_serde, EntityDescriptor, MappingError, NaturalKey};
use crate::repository::Repository;

/// Descriptor for [`Profile`]s, stored in the `Profile` collection and
/// keyed naturally by `username`.
pub struct ProfileDescriptor;

impl EntityDescriptor for ProfileDescriptor {
    type Entity = Profile;

    const COLLECTION: &'static str = "Profile";
    const UNIQUE_FIELDS: &'static [&'static str] = &["username"];

    fn encode(entity: &Profile) -> Result<Document, MappingError> {
        encode_with_serde(entity)
    }

    fn decode(document: Document) -> Result<Profile, MappingError> {
        decode_with_serde(document)
    }

    fn id(entity: &Profile) -> Option<EntityId> {
        entity.id
    }

    fn set_id(entity: &mut Profile, id: EntityId) {
        entity.id = Some(id);
    }
}

impl NaturalKey for ProfileDescriptor {
    const KEY_FIELD: &'static str = "username";

    fn natural_key(entity: &Profile) -> Value {
        Value::String(entity.username.clone())
    }
}

/// Repository of [`Profile`]s.
pub type ProfileRepository = Repository<ProfileDescriptor>;

impl Repository<ProfileDescriptor> {
    /// The stored profile with `username`, if any.
    pub async fn get_by_username(&self, username: &str) -> RepositoryResult<Option<Profile>> {
        self.find_one(&Filter::eq(ProfileDescriptor::KEY_FIELD, username))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crowd_store::{ConnectionConfig, InMemoryServer, StoreSettings};
    use serde_json::json;

    #[test]
    fn encode_first_write_carries_only_given_fields() {
        let profile = Profile::new("b")
            .with_followers(Vec::<String>::new())
            .with_language("fr")
            .with_location("Z");
        let doc = ProfileDescriptor::encode(&profile).unwrap();
        assert_eq!(
            serde_json::Value::Object(doc),
            json!({ "username": "b", "followers": [], "language": "fr", "location": "Z" })
        );
    }

    #[test]
    fn decode_tolerates_unknown_fields() {
        let doc = json!({ "_id": EntityId::from_parts(1, [0; 5], 1).to_hex(), "username": "x", "extra": 1 })
            .as_object()
            .cloned()
            .unwrap();
        let profile = ProfileDescriptor::decode(doc).unwrap();
        assert_eq!(profile.username, "x");
        assert!(profile.id.is_some());
    }

    #[test]
    fn natural_key_is_username() {
        assert_eq!(ProfileDescriptor::natural_key(&Profile::new("k")), json!("k"));
    }

    #[tokio::test]
    async fn get_by_username() {
        let server = InMemoryServer::new("mem:1");
        let settings = StoreSettings::new(ConnectionConfig::new("mem:1", "crowd"));
        let repo = ProfileRepository::connect(&server, &settings, None).await.unwrap();
        repo.save(Profile::new("alice").with_bio("hello")).await.unwrap();

        let found = repo.get_by_username("alice").await.unwrap().unwrap();
        assert_eq!(found.bio.as_deref(), Some("hello"));
        assert!(repo.get_by_username("bob").await.unwrap().is_none());
    }
}
