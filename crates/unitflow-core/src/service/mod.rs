//! Service-level ports used by the engine.
//!
//! They depend on traits -- never on concrete infrastructure
//! implementations.

pub mod fs;

pub use fs::{FileSystem, InMemoryFileSystem};
