//! Platform conventions.
//!
//! Locations the hosting platform fixes for a staging run, with environment
//! overrides so tests and non-standard hosts can relocate them.

pub mod paths;
