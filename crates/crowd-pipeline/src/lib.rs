//! Pipeline stages over crowd repositories.
//!
//! A [`Stage`] turns an input [`ElementStream`] into an output stream.
//! Stages are chained by feeding one stage's output to the next; demand
//! travels upstream through every stage down to the store cursor, and
//! dropping the final stream cancels the whole chain.
//!
//! Every stage invocation parses its options from a JSON value, opens its
//! own repository (honouring the `db` option), and reports its lifecycle to
//! a [`Telemetry`] collaborator.
//!
//! # Built-in stages
//!
//! - [`FetchAllStage`] -- ignores its input and, once the input completes,
//!   emits every stored entity
//! - [`PersistWithMergeStage`] -- saves each entity, merging it into the
//!   stored record with the same natural key

pub mod error;
pub mod lifecycle;
pub mod options;
pub mod stage;
pub mod stages;
pub mod telemetry;

pub use error::{PipelineError, PipelineResult};
pub use lifecycle::Lifecycle;
pub use options::{DbOptions, StageOptions};
pub use stage::{ElementStream, Stage, StageContext, Transform};
pub use stages::fetch_all::{FetchAllStage, ProfileFetchStage, PROFILE_FETCH_STAGE};
pub use stages::persist_merge::{PersistWithMergeStage, ProfilePersistStage, PROFILE_PERSIST_STAGE};
pub use telemetry::{
    NoopTelemetry, RecordingTelemetry, Telemetry, TelemetryError, TelemetryEvent, TracingTelemetry,
};
