//! WebSocket transport for coaching sessions

mod handler;

pub use handler::ws_session_handler;
