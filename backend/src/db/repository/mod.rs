//! Repository trait definitions for the sample store.
//!
//! The store is split into two focused traits:
//!
//! - [`SampleRepository`]: CRUD and range queries over heart-rate samples
//! - [`ChangeFeed`]: a live, ordered stream of insert/update/delete notifications
//!
//! [`FullRepository`] bundles both and is what the server holds behind an `Arc`.

pub mod error;
pub mod feed;
pub mod sample;

pub use error::{ErrorContext, RepositoryError, RepositoryResult};
pub use feed::{ChangeFeed, ChangeStream};
pub use sample::SampleRepository;

/// Composite trait bound for a complete store implementation.
///
/// Automatically implemented for any type that implements both traits.
pub trait FullRepository: SampleRepository + ChangeFeed {}

impl<T> FullRepository for T where T: SampleRepository + ChangeFeed {}
