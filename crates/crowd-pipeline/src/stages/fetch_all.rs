use std::marker::PhantomData;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::Value;
use tracing::debug;

use crowd_repository::{EntityDescriptor, EntityStream, ProfileDescriptor, Repository};

use crate::error::{PipelineError, PipelineResult};
use crate::lifecycle::Lifecycle;
use crate::options::{DbOptions, StageOptions};
use crate::stage::{ElementStream, Stage, StageContext, Transform};

/// Identifier of the profile fetch stage.
pub const PROFILE_FETCH_STAGE: &str = "profile-rx-fetch";

/// Replaces its input with the full contents of a collection.
///
/// Input elements are pulled and discarded. When the input completes, the
/// stage streams every stored entity of kind `D`, pulling from the store
/// cursor only as its own output is polled. An input error is forwarded
/// immediately and the collection is never read.
pub struct FetchAllStage<D, I = Value> {
    name: &'static str,
    context: StageContext,
    _marker: PhantomData<fn() -> (D, I)>,
}

/// Fetch stage over the `Profile` collection.
pub type ProfileFetchStage<I = Value> = FetchAllStage<ProfileDescriptor, I>;

impl<D: EntityDescriptor, I> FetchAllStage<D, I> {
    pub fn new(name: &'static str, context: StageContext) -> Self {
        Self {
            name,
            context,
            _marker: PhantomData,
        }
    }
}

impl<I> FetchAllStage<ProfileDescriptor, I> {
    /// The `profile-rx-fetch` stage.
    pub fn profiles(context: StageContext) -> Self {
        Self::new(PROFILE_FETCH_STAGE, context)
    }
}

#[async_trait]
impl<D, I> Stage for FetchAllStage<D, I>
where
    D: EntityDescriptor,
    I: Send + 'static,
{
    type Input = I;
    type Output = D::Entity;
    type Options = DbOptions;

    fn name(&self) -> &'static str {
        self.name
    }

    async fn create_transform(&self, options: DbOptions) -> PipelineResult<Transform<I, D::Entity>> {
        let repository = self.context.repository::<D>(options.db()).await?;
        let lifecycle = self.context.lifecycle(self.name);
        Ok(Transform::new(move |input: ElementStream<I>| {
            let state = FetchState::Draining { input, repository };
            stream::unfold(state, move |state| step(state, lifecycle.clone())).boxed()
        }))
    }
}

enum FetchState<D: EntityDescriptor, I> {
    /// Discarding input until it completes.
    Draining {
        input: ElementStream<I>,
        repository: Repository<D>,
    },
    /// Forwarding the collection.
    Fetching { output: EntityStream<D::Entity> },
    Done,
}

async fn step<D: EntityDescriptor, I>(
    mut state: FetchState<D, I>,
    lifecycle: Lifecycle,
) -> Option<(PipelineResult<D::Entity>, FetchState<D, I>)> {
    loop {
        match state {
            FetchState::Draining {
                mut input,
                repository,
            } => match input.next().await {
                Some(Ok(_)) => state = FetchState::Draining { input, repository },
                Some(Err(e)) => {
                    lifecycle.errored(&e);
                    return Some((Err(e), FetchState::Done));
                }
                None => {
                    debug!(
                        stage = lifecycle.stage(),
                        collection = repository.collection_name(),
                        "input completed; fetching collection"
                    );
                    state = FetchState::Fetching {
                        output: repository.stream_all(None),
                    };
                }
            },
            FetchState::Fetching { mut output } => {
                return match output.next().await {
                    Some(Ok(entity)) => Some((Ok(entity), FetchState::Fetching { output })),
                    Some(Err(e)) => {
                        let e = PipelineError::from(e);
                        lifecycle.errored(&e);
                        Some((Err(e), FetchState::Done))
                    }
                    None => {
                        lifecycle.completed();
                        None
                    }
                };
            }
            FetchState::Done => return None,
        }
    }
}
