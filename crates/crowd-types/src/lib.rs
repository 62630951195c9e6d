//! Foundation types for crowd data.
//!
//! Every other crowd crate depends on `crowd-types`. It provides the
//! store-assigned identity used by all collections and the entities that
//! pipelines read and persist.
//!
//! # Key Types
//!
//! - [`EntityId`] — 12-byte, time-ordered, store-assigned identity
//! - [`IdGenerator`] — produces ascending [`EntityId`]s for one store
//! - [`Profile`] — a social profile, keyed naturally by its username
//! - [`App`] — a registered application
//! - [`User`] — an account on a content source
//! - [`Mergeable`] — overwrite-on-merge behaviour for entities with volatile fields

pub mod app;
pub mod error;
pub mod id;
pub mod merge;
pub mod profile;
pub mod user;

pub use app::App;
pub use error::TypeError;
pub use id::{EntityId, IdGenerator};
pub use merge::Mergeable;
pub use profile::{Profile, PROFILE_VOLATILE_FIELDS};
pub use user::User;
