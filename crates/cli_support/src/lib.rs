//! Shared CLI plumbing for the `training` binaries.

pub mod common;

pub use common::{init_tracing, BackendKind, ConfigArgs};
