//! Core types and error definitions for Relay.
//!
//! This crate provides the foundational types shared across all Relay crates:
//! the error taxonomy, the observer event envelope, and the tool-call shapes
//! exchanged with the surrounding RPC layer.
//!
//! # Main types
//!
//! - [`RelayError`] — Unified error enum for all Relay subsystems.
//! - [`RelayResult`] — Convenience alias for `Result<T, RelayError>`.
//! - [`Event`] — A `{ type, timestamp, data }` envelope pushed to observers.
//! - [`EventKind`] — The closed vocabulary of observer event types.
//! - [`ToolCall`] / [`ToolResult`] — Request/response of one tool invocation.

/// Error taxonomy.
pub mod error;
/// Observer event envelope.
pub mod event;
/// Tool-call request/response shapes.
pub mod tool;

pub use error::{RelayError, RelayResult};
pub use event::{Event, EventKind};
pub use tool::{ToolCall, ToolResult};
