//! Taxa CLI - Command-line interface for building and querying taxa datasets
//!
//! This crate ties the client, storage and core crates together: the sync
//! orchestrator, output rendering and the shell completion cache.

pub mod completion;
pub mod config;
pub mod output;
pub mod sync;

pub use config::{Command, CompletionAction, Config, DatabaseArgs, OutputFormat};
pub use output::render;
pub use sync::{plan_sync, run_sync, SyncPlan};
