use serde::{Deserialize, Serialize};

use crate::id::EntityId;
use crate::merge::Mergeable;

/// Fields of a [`Profile`] that are overwritten by the newest observation
/// when an already-stored profile is persisted again.
pub const PROFILE_VOLATILE_FIELDS: [&str; 4] = ["followers", "followings", "language", "location"];

/// A social profile gathered from an external source.
///
/// `username` is the natural key: repeated ingestion of the same user
/// resolves to one stored profile. `id` is assigned by the store on first
/// save and never changes afterwards.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<EntityId>,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub followers: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub followings: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl Profile {
    /// A profile with only its natural key set.
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            ..Default::default()
        }
    }

    pub fn with_followers<I, S>(mut self, followers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.followers = Some(followers.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_followings<I, S>(mut self, followings: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.followings = Some(followings.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_bio(mut self, bio: impl Into<String>) -> Self {
        self.bio = Some(bio.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

impl Mergeable for Profile {
    fn merge_volatile(&mut self, newer: &Self) {
        self.followers = newer.followers.clone();
        self.followings = newer.followings.clone();
        self.language = newer.language.clone();
        self.location = newer.location.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn stored() -> Profile {
        let mut p = Profile::new("a")
            .with_followers(["1", "2"])
            .with_language("en")
            .with_location("X")
            .with_bio("hi");
        p.id = Some(EntityId::from_parts(10, [1; 5], 1));
        p
    }

    #[test]
    fn merge_overwrites_only_volatile_fields() {
        let mut existing = stored();
        let incoming = Profile::new("a")
            .with_followers(["3"])
            .with_followings(["9"])
            .with_language("it")
            .with_location("Y");

        existing.merge_volatile(&incoming);

        assert_eq!(existing.followers, Some(vec!["3".to_string()]));
        assert_eq!(existing.followings, Some(vec!["9".to_string()]));
        assert_eq!(existing.language.as_deref(), Some("it"));
        assert_eq!(existing.location.as_deref(), Some("Y"));
        assert_eq!(existing.bio.as_deref(), Some("hi"));
        assert_eq!(existing.username, "a");
        assert_eq!(existing.id, stored().id);
    }

    #[test]
    fn merge_clears_volatile_fields_absent_from_newer() {
        let mut existing = stored();
        existing.merge_volatile(&Profile::new("a"));
        assert!(existing.followers.is_none());
        assert!(existing.language.is_none());
        assert!(existing.location.is_none());
        assert_eq!(existing.bio.as_deref(), Some("hi"));
    }

    #[test]
    fn merge_keeps_source_of_stored_profile() {
        let mut existing = stored().with_source("twitter");
        existing.merge_volatile(&Profile::new("a").with_source("facebook"));
        assert_eq!(existing.source.as_deref(), Some("twitter"));
    }

    #[test]
    fn absent_fields_are_not_serialized() {
        let p = Profile::new("b").with_followers(Vec::<String>::new()).with_language("fr");
        let json = serde_json::to_value(&p).unwrap();
        let obj = json.as_object().unwrap();
        let mut keys: Vec<&str> = obj.keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(keys, vec!["followers", "language", "username"]);
    }

    #[test]
    fn volatile_field_names_match_serialized_names() {
        let p = Profile::new("c")
            .with_followers(["x"])
            .with_followings(["y"])
            .with_language("en")
            .with_location("Z");
        let json = serde_json::to_value(&p).unwrap();
        for field in PROFILE_VOLATILE_FIELDS {
            assert!(json.get(field).is_some(), "missing {field}");
        }
    }

    proptest! {
        #[test]
        fn merge_is_idempotent(
            followers in proptest::collection::vec("[a-z]{1,6}", 0..5),
            language in proptest::option::of("[a-z]{2}"),
        ) {
            let mut incoming = Profile::new("a").with_followers(followers);
            incoming.language = language;

            let mut once = stored();
            once.merge_volatile(&incoming);
            let mut twice = once.clone();
            twice.merge_volatile(&incoming);
            prop_assert_eq!(once, twice);
        }
    }
}
