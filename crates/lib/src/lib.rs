//! multipack-lib: Core types and logic for multipack
//!
//! This crate stages an application by running an ordered chain of buildpacks:
//! - `source`: resolves buildpack references to local directories
//! - `cache`: per-buildpack persistent cache slots and their pruning
//! - `chain`: the supply/detect/compile/release state machine
//! - `staging`: scratch workspace and deps directory relocation
//! - `droplet`: archive assembly for the staged application
//! - `release`: translation of staging metadata into a release descriptor
//! - `compile`: wires the above behind a single staging call

pub mod cache;
pub mod chain;
pub mod compile;
pub mod config;
pub mod consts;
pub mod droplet;
pub mod error;
pub mod log;
pub mod platform;
pub mod release;
pub mod source;
pub mod staging;
pub mod util;

pub use error::{StageError, exit_codes};
