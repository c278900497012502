//! # Motion Host Core Library
//!
//! Core library for a G-code motion-control host. Its centerpiece is the
//! operator-defined macro system: named, parameterized commands that expand,
//! through a shared template engine, into further machine-control commands
//! and resubmit them through the same dispatch pipeline they hook into.
//!
//! ## Crate Structure
//!
//! - **`config`**: TOML settings and named option sections. Macro
//!   definitions live in `[gcode_macro.<name>]` tables.
//! - **`error`**: the `HostError` enum for centralized error handling.
//! - **`gcode`**: command registration, command-line parsing, and
//!   synchronous (re-entrant) script execution.
//! - **`gcode_macro`**: macro definitions, the invocation pipeline, and the
//!   per-invocation status snapshot accessor.
//! - **`logging`**: `tracing` subscriber setup.
//! - **`registry`**: named host objects, the status-snapshot capability, and
//!   the monotonic clock.
//! - **`template`**: the shared `minijinja` environment all macros compile
//!   into.
//!
//! ## Defining a macro
//!
//! ```toml
//! [gcode_macro.park_head]
//! gcode = "G1 X{params.X|default(0)} F{F}"
//! default_parameter_F = "3000"
//! ```
//!
//! Invoking `PARK_HEAD X=10` renders the template with `X=10`, `F=3000` and
//! a fresh `status` accessor, then dispatches the resulting text as G-code.

pub mod config;
pub mod error;
pub mod gcode;
pub mod gcode_macro;
pub mod logging;
pub mod registry;
pub mod template;
