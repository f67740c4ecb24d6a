//! Core engine — the fetch → aggregate → normalize batch pipeline.

pub mod cache;
pub mod normalizer;
pub mod pipeline;
