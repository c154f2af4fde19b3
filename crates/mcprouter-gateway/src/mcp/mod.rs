//! MCP Server Implementation
//!
//! This module implements the Model Context Protocol frontend using rmcp's
//! ServerHandler trait. The same handler is served over StreamableHttpService
//! (many clients) and over stdio (one client).
//!
//! - `handler`: Implements ServerHandler, delegates to the Dispatcher
//! - `context`: Profile, request id and progress token extraction

pub mod context;
pub mod handler;

pub use handler::RouterHandler;
