//! Typed repositories over the crowd document store.
//!
//! One generic [`Repository`] serves every entity kind. What varies per
//! kind lives in an [`EntityDescriptor`]: the collection name, the
//! encode/decode pair, and the fields that must stay unique.
//!
//! Reads come in two flavours:
//! - bounded lookups and lists (`find_by_id`, `get_between_keys`, `get_all`)
//! - lazy streams (`stream_all`, `find_between_keys`) that pull from the
//!   store cursor only as fast as the consumer polls, and end with the
//!   first error they meet

pub mod app;
pub mod error;
pub mod mapping;
pub mod profile;
pub mod repository;
pub mod user;

pub use app::{AppDescriptor, AppRepository};
pub use error::{RepositoryError, RepositoryResult};
pub use mapping::{decode_with_serde, encode_with_serde, EntityDescriptor, MappingError, NaturalKey};
pub use profile::{ProfileDescriptor, ProfileRepository};
pub use repository::{EntityStream, Repository};
pub use user::{UserDescriptor, UserRepository};
