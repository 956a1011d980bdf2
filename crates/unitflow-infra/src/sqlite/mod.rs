//! SQLite storage layer.
//!
//! The engine state store backed by SQLite with WAL mode and split
//! read/write connection pools.

pub mod kv;
pub mod pool;
