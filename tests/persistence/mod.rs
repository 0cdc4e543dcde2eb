//! Persistence tests
//!
//! Parameter archives and components backed by external files.

pub mod archive_tests;
pub mod tabulated_tests;
