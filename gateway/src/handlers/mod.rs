//! HTTP and WebSocket request handlers
//!
//! - `api` - Health check and session introspection
//! - `ws` - WebSocket coaching sessions

pub mod api;
pub mod ws;

pub use ws::ws_session_handler;
