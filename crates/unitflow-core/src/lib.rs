//! Workflow engine and port traits for unitflow.
//!
//! This crate defines the "ports" (storage and filesystem traits) that the
//! infrastructure layer implements, plus the engine built on top of them.
//! It depends only on `unitflow-types` -- never on `unitflow-infra` or any
//! database/IO crate.

pub mod event;
pub mod service;
pub mod storage;
pub mod workflow;
