//! Shared domain types for unitflow.
//!
//! This crate contains the data model of the workflow engine: workflows,
//! tasks, templates, conditions, the shared workflow context, lifecycle
//! events, engine configuration, and the collaborator error types.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod context;
pub mod error;
pub mod event;
pub mod workflow;
