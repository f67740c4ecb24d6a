//! RAINWATCH — batch current-weather lookup with normalized rainfall.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod api;
pub mod config;
pub mod data;
pub mod engine;
pub mod types;
