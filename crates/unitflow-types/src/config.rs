//! Engine configuration types for unitflow.
//!
//! `EngineConfig` is the `config.toml` that controls persistence keys,
//! template storage, and the scheduling policies for the two behaviors
//! that admit more than one reasonable answer.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// What the scheduler does with a pending task whose dependency ended in
/// `failed`, `skipped` or `cancelled`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockedDependencyPolicy {
    /// Promote the dependent to `skipped`. Every workflow terminates.
    #[default]
    Skip,
    /// Leave the dependent `pending`. The workflow may never finish.
    Wait,
}

/// How dependency edges treat a task that has been retried.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryLinkage {
    /// Edges follow the retry chain to the most recent attempt.
    #[default]
    LatestAttempt,
    /// Edges stay on the id they were declared with.
    OriginalOnly,
}

/// Top-level configuration for a workflow engine instance.
///
/// Loaded from `~/.unitflow/config.toml`. All fields have defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Directory holding one `<template-id>.json` file per template.
    /// Template persistence is disabled when unset.
    #[serde(default)]
    pub template_directory: Option<PathBuf>,

    /// Key under which the whole engine state blob is stored.
    #[serde(default = "default_state_key")]
    pub state_key: String,

    /// Capacity of the lifecycle event broadcast channel.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    /// Timeout applied to tasks that do not declare their own.
    #[serde(default)]
    pub default_task_timeout_ms: Option<u64>,

    /// Re-enter the scheduler for active workflows found in persisted state.
    #[serde(default = "default_true")]
    pub resume_on_start: bool,

    #[serde(default)]
    pub blocked_dependency_policy: BlockedDependencyPolicy,

    #[serde(default)]
    pub retry_linkage: RetryLinkage,
}

fn default_state_key() -> String {
    "workflow_engine".to_string()
}

fn default_event_capacity() -> usize {
    1024
}

fn default_true() -> bool {
    true
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            template_directory: None,
            state_key: default_state_key(),
            event_capacity: default_event_capacity(),
            default_task_timeout_ms: None,
            resume_on_start: true,
            blocked_dependency_policy: BlockedDependencyPolicy::default(),
            retry_linkage: RetryLinkage::default(),
        }
    }
}
