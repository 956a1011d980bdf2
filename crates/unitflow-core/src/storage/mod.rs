//! Storage abstractions for unitflow.
//!
//! Defines the key-value store the engine persists its state through.
//! The durable implementation lives in unitflow-infra.

pub mod kv_store;

pub use kv_store::{InMemoryKvStore, KvStore};
