use std::marker::PhantomData;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tracing::debug;

use crowd_repository::{NaturalKey, ProfileDescriptor, Repository};
use crowd_types::Mergeable;

use crate::error::{PipelineError, PipelineResult};
use crate::lifecycle::Lifecycle;
use crate::options::{DbOptions, StageOptions};
use crate::stage::{ElementStream, Stage, StageContext, Transform};

/// Identifier of the profile persist stage.
pub const PROFILE_PERSIST_STAGE: &str = "profile-persist";

/// Upserts every incoming entity, merging it into the stored record with
/// the same natural key.
///
/// For each element, in order and one at a time:
/// 1. look up the stored entity sharing the element's natural key
/// 2. if found, overwrite its volatile fields with the element's and keep
///    the stored entity; otherwise keep the element as-is
/// 3. save the kept entity and emit what was saved
///
/// The first failed lookup or write ends the output with that error.
/// Writes already made stay.
pub struct PersistWithMergeStage<D> {
    name: &'static str,
    context: StageContext,
    _descriptor: PhantomData<fn() -> D>,
}

/// Persist stage over the `Profile` collection.
pub type ProfilePersistStage = PersistWithMergeStage<ProfileDescriptor>;

impl<D> PersistWithMergeStage<D>
where
    D: NaturalKey,
    D::Entity: Mergeable,
{
    pub fn new(name: &'static str, context: StageContext) -> Self {
        Self {
            name,
            context,
            _descriptor: PhantomData,
        }
    }
}

impl PersistWithMergeStage<ProfileDescriptor> {
    /// The `profile-persist` stage.
    pub fn profiles(context: StageContext) -> Self {
        Self::new(PROFILE_PERSIST_STAGE, context)
    }
}

#[async_trait]
impl<D> Stage for PersistWithMergeStage<D>
where
    D: NaturalKey,
    D::Entity: Mergeable,
{
    type Input = D::Entity;
    type Output = D::Entity;
    type Options = DbOptions;

    fn name(&self) -> &'static str {
        self.name
    }

    async fn create_transform(
        &self,
        options: DbOptions,
    ) -> PipelineResult<Transform<D::Entity, D::Entity>> {
        let repository = self.context.repository::<D>(options.db()).await?;
        let lifecycle = self.context.lifecycle(self.name);
        Ok(Transform::new(move |input: ElementStream<D::Entity>| {
            let state = PersistState::Running { input, repository };
            stream::unfold(state, move |state| step(state, lifecycle.clone())).boxed()
        }))
    }
}

enum PersistState<D: NaturalKey> {
    Running {
        input: ElementStream<D::Entity>,
        repository: Repository<D>,
    },
    Done,
}

async fn step<D>(
    state: PersistState<D>,
    lifecycle: Lifecycle,
) -> Option<(PipelineResult<D::Entity>, PersistState<D>)>
where
    D: NaturalKey,
    D::Entity: Mergeable,
{
    let PersistState::Running {
        mut input,
        repository,
    } = state
    else {
        return None;
    };
    match input.next().await {
        Some(Ok(incoming)) => {
            let id = D::id(&incoming);
            lifecycle.element_started(id.as_ref());
            match persist(&repository, incoming).await {
                Ok(saved) => {
                    lifecycle.element_ended(id.as_ref());
                    Some((Ok(saved), PersistState::Running { input, repository }))
                }
                Err(e) => {
                    lifecycle.errored(&e);
                    Some((Err(e), PersistState::Done))
                }
            }
        }
        Some(Err(e)) => {
            lifecycle.errored(&e);
            Some((Err(e), PersistState::Done))
        }
        None => {
            lifecycle.completed();
            None
        }
    }
}

/// Merge `incoming` into its stored counterpart, if any, and save.
async fn persist<D>(repository: &Repository<D>, incoming: D::Entity) -> PipelineResult<D::Entity>
where
    D: NaturalKey,
    D::Entity: Mergeable,
{
    let chosen = match repository.find_by_natural_key(&incoming).await? {
        Some(mut existing) => {
            debug!(
                collection = D::COLLECTION,
                key = %D::natural_key(&incoming),
                "merging into stored entity"
            );
            existing.merge_volatile(&incoming);
            existing
        }
        None => incoming,
    };
    repository.save(chosen).await.map_err(PipelineError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crowd_store::{ConnectionConfig, Document, InMemoryServer, StoreSettings};
    use crowd_types::Profile;
    use futures::stream::TryStreamExt;
    use proptest::prelude::*;
    use serde_json::{json, Value};

    use crate::stages::fetch_all::{FetchAllStage, ProfileFetchStage};
    use crate::telemetry::{RecordingTelemetry, TelemetryEvent};

    const ADDR: &str = "mem:27017";

    fn context(server: &Arc<InMemoryServer>, telemetry: &Arc<RecordingTelemetry>) -> StageContext {
        StageContext::new(
            server.clone(),
            StoreSettings::new(ConnectionConfig::new(ADDR, "crowd")),
        )
        .with_telemetry(telemetry.clone())
    }

    fn setup() -> (Arc<InMemoryServer>, Arc<RecordingTelemetry>, ProfilePersistStage) {
        let server = Arc::new(InMemoryServer::new(ADDR));
        let telemetry = Arc::new(RecordingTelemetry::new());
        let stage = PersistWithMergeStage::profiles(context(&server, &telemetry));
        (server, telemetry, stage)
    }

    fn profiles(items: Vec<Profile>) -> ElementStream<Profile> {
        stream::iter(items.into_iter().map(Ok)).boxed()
    }

    async fn run(stage: &ProfilePersistStage, items: Vec<Profile>) -> Vec<PipelineResult<Profile>> {
        stage
            .process(&Value::Null, profiles(items))
            .await
            .unwrap()
            .collect()
            .await
    }

    fn stored(server: &InMemoryServer) -> Vec<Value> {
        server
            .database("crowd")
            .documents("Profile")
            .into_iter()
            .map(|mut d: Document| {
                d.remove("_id");
                Value::Object(d)
            })
            .collect()
    }

    // -----------------------------------------------------------------------
    // Merge semantics
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn merges_volatile_fields_into_stored_record() {
        let (server, _, stage) = setup();
        let first = run(
            &stage,
            vec![Profile::new("a")
                .with_followers(vec!["1", "2"])
                .with_language("en")
                .with_location("X")
                .with_bio("hi")],
        )
        .await;
        let stored_id = first[0].as_ref().unwrap().id;

        let out = run(
            &stage,
            vec![Profile::new("a")
                .with_followers(vec!["3"])
                .with_followings(vec!["9"])
                .with_language("it")
                .with_location("Y")],
        )
        .await;

        let merged = out[0].as_ref().unwrap();
        assert_eq!(merged.id, stored_id);
        assert_eq!(merged.bio.as_deref(), Some("hi"));
        assert_eq!(
            stored(&server),
            vec![json!({
                "username": "a",
                "bio": "hi",
                "followers": ["3"],
                "followings": ["9"],
                "language": "it",
                "location": "Y",
            })]
        );
    }

    #[tokio::test]
    async fn first_write_stores_exactly_the_given_fields() {
        let (server, _, stage) = setup();
        let out = run(
            &stage,
            vec![Profile::new("b")
                .with_followers(Vec::<String>::new())
                .with_language("fr")
                .with_location("Z")],
        )
        .await;
        assert!(out[0].as_ref().unwrap().id.is_some());
        assert_eq!(
            stored(&server),
            vec![json!({ "username": "b", "followers": [], "language": "fr", "location": "Z" })]
        );
    }

    #[tokio::test]
    async fn repeated_key_within_one_run_merges() {
        let (server, _, stage) = setup();
        let out = run(
            &stage,
            vec![
                Profile::new("a").with_bio("kept").with_language("en"),
                Profile::new("a").with_bio("ignored").with_language("de"),
            ],
        )
        .await;
        assert_eq!(out.len(), 2);
        let second = out[1].as_ref().unwrap();
        assert_eq!(second.bio.as_deref(), Some("kept"));
        assert_eq!(second.language.as_deref(), Some("de"));
        assert_eq!(server.database("crowd").len("Profile"), 1);
    }

    #[tokio::test]
    async fn db_option_selects_database() {
        let (server, _, stage) = setup();
        let out: Vec<Profile> = stage
            .process(&json!({ "db": "archive", "batch": 10 }), profiles(vec![Profile::new("a")]))
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(server.database("archive").len("Profile"), 1);
        assert_eq!(server.database("crowd").len("Profile"), 0);
    }

    proptest! {
        #[test]
        fn persisting_twice_keeps_one_record(
            followers in proptest::collection::vec("[a-z]{1,6}", 0..4),
            language in proptest::option::of("[a-z]{2}"),
        ) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            rt.block_on(async {
                let (server, _, stage) = setup();
                let mut profile = Profile::new("k").with_followers(followers.clone());
                profile.language = language.clone();
                run(&stage, vec![profile.clone()]).await;
                run(&stage, vec![profile]).await;

                let db = server.database("crowd");
                assert_eq!(db.len("Profile"), 1);
                let doc = &db.documents("Profile")[0];
                assert_eq!(doc["followers"], json!(followers));
                assert_eq!(doc.get("language").cloned(), language.map(Value::String));
            });
        }
    }

    // -----------------------------------------------------------------------
    // Errors
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn write_fault_is_terminal_and_keeps_earlier_writes() {
        let (server, telemetry, stage) = setup();
        let db = server.database("crowd");
        let mut out = stage
            .process(
                &Value::Null,
                profiles(vec![Profile::new("a"), Profile::new("b"), Profile::new("c")]),
            )
            .await
            .unwrap();

        assert!(out.next().await.unwrap().is_ok());
        db.inject_write_fault("read-only");
        let err = out.next().await.unwrap().unwrap_err();
        assert!(err.is_write());
        assert!(out.next().await.is_none());

        assert_eq!(db.len("Profile"), 1);
        assert_eq!(
            telemetry.events(),
            vec![
                TelemetryEvent::ElementStarted(None),
                TelemetryEvent::ElementEnded(None),
                TelemetryEvent::ElementStarted(None),
                TelemetryEvent::StageErrored,
            ]
        );
    }

    #[tokio::test]
    async fn upstream_error_is_forwarded_verbatim() {
        let (server, telemetry, stage) = setup();
        let input = stream::iter(vec![
            Ok(Profile::new("a")),
            Err(PipelineError::upstream("feed broke")),
            Ok(Profile::new("b")),
        ])
        .boxed();
        let out: Vec<_> = stage.process(&Value::Null, input).await.unwrap().collect().await;

        assert_eq!(out.len(), 2);
        assert!(out[0].is_ok());
        assert_eq!(out[1], Err(PipelineError::upstream("feed broke")));
        assert_eq!(server.database("crowd").len("Profile"), 1);
        assert_eq!(telemetry.events().last(), Some(&TelemetryEvent::StageErrored));
    }

    #[tokio::test]
    async fn undecodable_stored_record_fails_the_lookup() {
        let (server, _, stage) = setup();
        let broken = json!({ "username": "a", "followers": 7 });
        server
            .database("crowd")
            .insert_raw("Profile", broken.as_object().cloned().unwrap());
        let out = run(&stage, vec![Profile::new("a")]).await;
        assert_eq!(out.len(), 1);
        assert!(out[0].as_ref().unwrap_err().is_decode());
    }

    #[tokio::test]
    async fn failing_telemetry_does_not_change_output() {
        let server = Arc::new(InMemoryServer::new(ADDR));
        let telemetry = Arc::new(RecordingTelemetry::failing());
        let stage = PersistWithMergeStage::profiles(context(&server, &telemetry));
        let out = run(&stage, vec![Profile::new("a"), Profile::new("b")]).await;
        assert!(out.iter().all(Result::is_ok));
        assert_eq!(out.len(), 2);
        assert_eq!(telemetry.events().len(), 5);
    }

    #[tokio::test]
    async fn unreachable_store_fails_at_creation() {
        let (server, _, stage) = setup();
        server.set_reachable(false);
        let err = stage
            .process(&Value::Null, profiles(vec![]))
            .await
            .err()
            .unwrap();
        assert!(err.is_connection());
    }

    // -----------------------------------------------------------------------
    // Lifecycle and ordering
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn brackets_do_not_interleave() {
        let (_, telemetry, stage) = setup();
        let id = crowd_types::EntityId::from_parts(7, [1; 5], 1);
        let mut known = Profile::new("known");
        known.id = Some(id);

        run(&stage, vec![known, Profile::new("fresh")]).await;
        assert_eq!(
            telemetry.events_for(PROFILE_PERSIST_STAGE),
            vec![
                TelemetryEvent::ElementStarted(Some(id)),
                TelemetryEvent::ElementEnded(Some(id)),
                TelemetryEvent::ElementStarted(None),
                TelemetryEvent::ElementEnded(None),
                TelemetryEvent::StageCompleted,
            ]
        );
    }

    #[tokio::test]
    async fn one_element_at_a_time() {
        let (server, _, stage) = setup();
        let db = server.database("crowd");
        let mut out = stage
            .process(&Value::Null, profiles(vec![Profile::new("a"), Profile::new("b")]))
            .await
            .unwrap();
        assert_eq!(db.writes(), 0);
        out.next().await.unwrap().unwrap();
        assert_eq!(db.writes(), 1);
        assert_eq!(db.lookups(), 1);
    }

    #[tokio::test]
    async fn persist_then_fetch() {
        let server = Arc::new(InMemoryServer::new(ADDR));
        let telemetry = Arc::new(RecordingTelemetry::new());
        let ctx = context(&server, &telemetry);
        let persist = ProfilePersistStage::profiles(ctx.clone());
        let fetch: ProfileFetchStage<Profile> = FetchAllStage::profiles(ctx);

        let persisted = persist
            .process(
                &Value::Null,
                profiles(vec![Profile::new("x"), Profile::new("y"), Profile::new("x")]),
            )
            .await
            .unwrap();
        let fetched: Vec<Profile> = fetch
            .process(&Value::Null, persisted)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();

        let names: Vec<&str> = fetched.iter().map(|p| p.username.as_str()).collect();
        assert_eq!(names, vec!["x", "y"]);
        assert_eq!(
            telemetry.events_for("profile-rx-fetch"),
            vec![TelemetryEvent::StageCompleted]
        );
        assert_eq!(telemetry.events_for(PROFILE_PERSIST_STAGE).len(), 7);
    }

    #[tokio::test]
    async fn independent_runs_proceed_concurrently() {
        let server = Arc::new(InMemoryServer::new(ADDR));
        let mut handles = Vec::new();
        for run_no in 0..4 {
            let server = server.clone();
            handles.push(tokio::spawn(async move {
                let telemetry = Arc::new(RecordingTelemetry::new());
                let stage = PersistWithMergeStage::profiles(context(&server, &telemetry));
                let items = (0..5).map(|i| Profile::new(format!("r{run_no}-{i}"))).collect();
                run(&stage, items).await.len()
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap(), 5);
        }
        assert_eq!(server.database("crowd").len("Profile"), 20);
    }

    #[test]
    fn stage_name() {
        assert_eq!(setup().2.name(), "profile-persist");
    }
}
