//! Integration tests for multipack-lib.
//!
//! Fake buildpacks are shell scripts, so these tests only run on Unix.

#![cfg(unix)]

mod chain_tests;
mod compile_tests;
