//! subforge - subtitle job queue for a home media library
//!
//! Videos found by the scanner are queued in SQLite, transcribed with whisper.cpp
//! and translated through an LLM provider. Subtitles are written beside the videos.

pub mod cli;
pub mod config;
pub mod error;
pub mod queue;
pub mod scanner;
pub mod subtitle;
pub mod transcribe;
pub mod translate;
