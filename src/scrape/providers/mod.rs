//! Concrete metadata provider implementations.
//!
//! Each submodule implements the [`Provider`](super::Provider) trait:
//! [`tmdb`] wraps the TMDB REST API, [`fixture`] answers from an in-memory
//! catalogue.

pub mod fixture;
pub mod tmdb;

pub use fixture::{StaticCatalogue, StaticEntry, StaticProvider, StaticProviderSpec};
pub use tmdb::{TmdbProvider, TMDB};
