use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::Value;

use crowd_repository::{EntityDescriptor, Repository};
use crowd_store::{Connector, StoreSettings};

use crate::error::{PipelineError, PipelineResult};
use crate::lifecycle::Lifecycle;
use crate::options::StageOptions;
use crate::telemetry::{NoopTelemetry, Telemetry};

/// The sequence flowing between stages. An `Err` item is terminal: a
/// well-behaved producer yields nothing after it.
pub type ElementStream<T> = BoxStream<'static, PipelineResult<T>>;

// ---------------------------------------------------------------------------
// StageContext
// ---------------------------------------------------------------------------

/// Collaborators shared by every invocation of a stage.
///
/// Holds no per-invocation state: each invocation opens its own repository
/// through the connector.
#[derive(Clone)]
pub struct StageContext {
    connector: Arc<dyn Connector>,
    settings: StoreSettings,
    telemetry: Arc<dyn Telemetry>,
}

impl StageContext {
    /// A context that discards telemetry.
    pub fn new(connector: Arc<dyn Connector>, settings: StoreSettings) -> Self {
        Self {
            connector,
            settings,
            telemetry: Arc::new(NoopTelemetry),
        }
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn Telemetry>) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn settings(&self) -> &StoreSettings {
        &self.settings
    }

    /// Lifecycle reporter for one invocation of `stage`.
    pub fn lifecycle(&self, stage: &'static str) -> Lifecycle {
        Lifecycle::new(stage, Arc::clone(&self.telemetry))
    }

    /// Open a repository, on `db` when given.
    pub async fn repository<D: EntityDescriptor>(&self, db: Option<&str>) -> PipelineResult<Repository<D>> {
        Ok(Repository::connect(self.connector.as_ref(), &self.settings, db).await?)
    }
}

impl fmt::Debug for StageContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageContext")
            .field("settings", &self.settings)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Transform
// ---------------------------------------------------------------------------

/// A ready-to-apply stream transform produced by one stage invocation.
pub struct Transform<I, O> {
    apply: Box<dyn FnOnce(ElementStream<I>) -> ElementStream<O> + Send>,
}

impl<I, O> Transform<I, O> {
    pub fn new<F>(apply: F) -> Self
    where
        F: FnOnce(ElementStream<I>) -> ElementStream<O> + Send + 'static,
    {
        Self {
            apply: Box::new(apply),
        }
    }

    /// Consume `input`, producing the output stream.
    pub fn apply(self, input: ElementStream<I>) -> ElementStream<O> {
        (self.apply)(input)
    }
}

impl<I, O> fmt::Debug for Transform<I, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Transform")
    }
}

// ---------------------------------------------------------------------------
// Stage trait
// ---------------------------------------------------------------------------

/// One step of a pipeline.
///
/// Contract for implementations:
/// - a transform works on one element at a time; the next element is not
///   pulled before the current one is fully handled
/// - `element_started`/`element_ended` bracket each element's work and
///   never interleave
/// - `completed` is reported before the output ends, `errored` before an
///   error is yielded; reporting never alters the stream
/// - after yielding an error the output ends
#[async_trait]
pub trait Stage: Send + Sync {
    type Input: Send + 'static;
    type Output: Send + 'static;
    type Options: StageOptions;

    /// Identifier of this stage (e.g., "profile-persist").
    fn name(&self) -> &'static str;

    /// Parse the stage options from an opaque configuration value.
    fn options(&self, value: &Value) -> PipelineResult<Self::Options> {
        Self::Options::from_value(value).map_err(|e| PipelineError::Options {
            stage: self.name().to_string(),
            reason: e.to_string(),
        })
    }

    /// Build a fresh transform for one invocation. Connection errors
    /// surface here, before any element flows.
    async fn create_transform(
        &self,
        options: Self::Options,
    ) -> PipelineResult<Transform<Self::Input, Self::Output>>;

    /// Parse `options`, build the transform and apply it to `input`.
    async fn process(
        &self,
        options: &Value,
        input: ElementStream<Self::Input>,
    ) -> PipelineResult<ElementStream<Self::Output>> {
        let options = self.options(options)?;
        let transform = self.create_transform(options).await?;
        Ok(transform.apply(input))
    }
}
