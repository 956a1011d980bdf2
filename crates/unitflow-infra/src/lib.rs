//! Infrastructure layer for unitflow.
//!
//! Contains implementations of the port traits defined in `unitflow-core`:
//! SQLite key-value storage for engine state, the local filesystem adapter
//! for template files, and the `config.toml` loader.

pub mod config;
pub mod filesystem;
pub mod sqlite;
