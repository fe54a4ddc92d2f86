//! Core pipeline orchestration and domain logic for paperdigest.
//!
//! This crate ties together listing fetch, LLM ranking, PDF retrieval,
//! Markdown conversion, summarization, and digest assembly into the
//! end-to-end `run_digest` workflow.

pub mod assembler;
pub mod pipeline;
pub mod ranker;
pub mod summarizer;
