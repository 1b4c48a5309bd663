//! Foundation utilities shared by every brdflow crate: the error taxonomy,
//! exit codes, logging, atomic writes, canonical JSON and run paths.

pub mod atomic_write;
pub mod canonicalization;
pub mod error;
pub mod exit_codes;
pub mod logging;
pub mod paths;
pub mod types;

pub use error::BrdflowError;
pub use exit_codes::ExitCode;
