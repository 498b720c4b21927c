//! Infrastructure layer for conductor.
//!
//! Implements the repository traits defined in `conductor-core` on SQLite
//! and loads engine configuration from the data directory.

pub mod config;
pub mod sqlite;
