//! Custom error types for the host.
//!
//! This module defines the primary error type, `HostError`, for the entire
//! crate. Using the `thiserror` crate, it provides a centralized and
//! consistent way to handle the different kinds of failures that can occur,
//! from configuration problems at load time to template evaluation faults
//! during command dispatch.
//!
//! ## Error Hierarchy
//!
//! `HostError` consolidates several error sources:
//!
//! - **`Config`** / **`ConfigParse`** / **`Io`**: problems reading or
//!   validating the host configuration. `Config` covers semantic errors
//!   (a missing required option, a duplicate registration), while
//!   `ConfigParse` wraps TOML syntax errors.
//! - **`TemplateCompile`**: a macro's template body failed to parse. Fatal
//!   to loading that one macro.
//! - **`TemplateRender`**: a fault while evaluating a macro's template at
//!   invocation time.
//! - **`MacroRecursion`**: a macro re-entered itself while its own expansion
//!   was still being dispatched.
//! - **`UnknownCommand`** / **`Command`**: command-layer failures. `Command`
//!   is the general-purpose constructor used by command handlers.
//!
//! By using `#[from]`, `HostError` can be seamlessly created from underlying
//! error types, simplifying error handling throughout the crate with the `?`
//! operator.

use thiserror::Error;

/// Convenience alias for results using the host error type.
pub type HostResult<T> = std::result::Result<T, HostError>;

#[derive(Error, Debug)]
pub enum HostError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Malformed configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Error loading template {alias}: {reason}")]
    TemplateCompile { alias: String, reason: String },

    #[error("Error evaluating {alias}: {reason}")]
    TemplateRender { alias: String, reason: String },

    #[error("Macro {alias} called recursively")]
    MacroRecursion { alias: String },

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("{0}")]
    Command(String),
}
