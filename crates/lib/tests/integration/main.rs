//! Library integration tests: whole-lifecycle runs through the orchestrator.

mod common;

mod clean_tests;
mod lifecycle_tests;
mod toolchain_tests;
