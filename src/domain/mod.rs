//! RCA domain: cases and their children, persistence, and MCP tool/resource integrations
//!
//! Tools and resources are thin adapters over [`store::CaseStore`].

pub mod model;
pub mod resources;
pub mod schemas;
pub mod store;
pub mod tools;
pub mod utils;
