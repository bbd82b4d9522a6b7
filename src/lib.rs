//! Codeweave library exports

pub mod advice;
pub mod config;
pub mod engine;
pub mod loader;
pub mod model;
pub mod pattern;
pub mod registry;
pub mod reweave;
pub mod weave;

pub use engine::{Engine, HostBridge, RetransformOutcome};
