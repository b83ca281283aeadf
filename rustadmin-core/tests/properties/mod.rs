//! Property-based tests for RustAdmin core library

mod directory_tests;
mod handoff_tests;
mod line_tests;
