//! MCP surface: the tool dispatcher and server (responder side) and the
//! client session (initiator side).
pub mod client;
pub mod server;
pub mod tools;
