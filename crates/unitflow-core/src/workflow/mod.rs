//! Workflow engine core: templates, scheduling, execution and persistence.
//!
//! - `definition` -- engine errors and structural validation of task lists
//! - `dag` -- dependency graph, cycle detection, execution stages
//! - `condition` -- task conditions and the JEXL expression evaluator
//! - `retry` -- retry attempts and retry-chain resolution
//! - `registry` -- action name to task executor mapping
//! - `template` -- template registry with JSON file persistence
//! - `instantiate` -- templates and ad-hoc specs into live workflows
//! - `scheduler` -- readiness, skipping and verdicts for one workflow
//! - `repository` -- live workflow state and its key-value persistence
//! - `notifier` -- lifecycle events
//! - `engine` -- the `WorkflowEngine` service tying it all together

pub mod condition;
pub mod dag;
pub mod definition;
pub mod engine;
pub mod instantiate;
pub mod notifier;
pub mod registry;
pub mod repository;
pub mod retry;
pub mod scheduler;
pub mod template;

pub use definition::EngineError;
pub use engine::WorkflowEngine;
pub use registry::{ExecutorRegistry, FnExecutor, TaskExecutor};
