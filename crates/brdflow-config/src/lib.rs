//! Configuration model, discovery, and validation for brdflow
//!
//! Precedence: CLI > config file > defaults. Every effective value records the
//! [`ConfigSource`] it came from.

mod config;

pub use config::*;
