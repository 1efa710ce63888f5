//! Client runtime layer: a scoped demand cache, navigation stacks mirrored
//! onto host history, and realtime subscription registries.

pub mod cache;
pub mod config;
pub mod logging;
pub mod navigation;
pub mod realtime;
pub mod runtime;
pub mod storage;
pub mod task;

pub use runtime::{Runtime, RuntimeBuilder, RuntimeError};
