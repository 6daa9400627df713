//! Model Context Protocol (MCP) server over framed JSON-RPC
//!
//! Provides wire framing, JSON-RPC validation and error mapping, request routing,
//! the tool registry and per-call context, and the stdio session lifecycle.

pub mod codec;
pub mod context;
pub mod registry;
pub mod rpc;
pub mod server;
pub mod session;
