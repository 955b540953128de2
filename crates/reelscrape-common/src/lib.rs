//! Reelscrape-Common: Shared domain vocabulary for the scrape engine.
//!
//! This crate provides the types that flow between the engine, provider
//! implementations, and the collaborators that consume merged records:
//!
//! - **Typed IDs**: Type-safe UUID wrappers for items and batches
//! - **Media Types**: [`MediaKind`], [`ChildKey`], [`Locale`]
//! - **Provider Identity**: [`ProviderName`] and [`CanonicalId`]
//! - **Fields and Records**: [`Field`], [`Value`], [`FieldValue`], [`MergedRecord`]
//! - **Error Handling**: Common error type and result alias
//!
//! # Examples
//!
//! ```
//! use reelscrape_common::{CanonicalId, Field, MediaKind};
//!
//! let id = CanonicalId::new("imdb", "tt0000001");
//! assert_eq!(id.to_string(), "imdb:tt0000001");
//!
//! assert_eq!(MediaKind::Episode.parent(), Some(MediaKind::TvShow));
//! assert!(Field::Poster.is_artwork());
//! ```

pub mod error;
pub mod fields;
pub mod ids;
pub mod record;
pub mod types;

pub use error::{Error, Result};
pub use fields::Field;
pub use ids::*;
pub use record::{FieldValue, Image, MergedRecord, Person, Value};
pub use types::*;
