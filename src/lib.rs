//! Reelscrape - Metadata scrape orchestration for media libraries
//!
//! This library crate exposes the engine and configuration layer for the
//! binary and for integration testing.

pub mod config;
pub mod scrape;
