//! HTTP and WebSocket gateway for the Relay orchestrator.
//!
//! Observers connect to `/ws`, receive an `initial_state` snapshot and then
//! every orchestrator event. Tool calls arrive as JSON on `POST /tools`.

/// Tool-call dispatch onto orchestrator operations.
pub mod router;
/// Axum server wiring.
pub mod server;

pub use router::{ToolRouter, TOOLS};
pub use server::GatewayServer;
