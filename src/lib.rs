//! Music link automation library - shared modules for the CLI.

pub mod backends;
pub mod config;
pub mod dedup;
pub mod llm;
pub mod models;
pub mod normalize;
pub mod processor;
pub mod progress;
pub mod runner;
pub mod scoring;
pub mod sheet;
pub mod source;
