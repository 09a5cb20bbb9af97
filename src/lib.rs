//! Token Radar Library
//!
//! Tiered token discovery over market data providers, with adaptive
//! threshold relaxation, appearance tracking and a staged alert gate.

pub mod alert;
pub mod cli;
pub mod config;
pub mod discovery;
pub mod error;
pub mod phase;
pub mod scanner;
pub mod scoring;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use config::Config;
pub use error::{Error, Result};
