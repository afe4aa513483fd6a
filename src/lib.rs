//! Podcast processing pipeline: feed ingestion, transcription, digest
//! summaries and blog writing over a single SQLite episode store.

pub mod commands;
pub mod config;
pub mod database;
pub mod error;
pub mod export;
pub mod llm;
pub mod worker;
pub mod writer;
