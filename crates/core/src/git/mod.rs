//! Git operations for papersync.

pub mod client;

pub use client::{GitClient, MergeOutcome};
