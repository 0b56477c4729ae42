//! MCP (Model Context Protocol) server exposing SSH operations as tools.
//!
//! Requests arrive as JSON-RPC either over HTTP or over stdio and are handled
//! by one shared dispatcher.

pub mod http;
pub mod rpc;
pub(crate) mod server;
pub mod stdio;
mod tools;

pub use server::McpSshService;
