//! HTTP frontend integration tests
//!
//! A real router on an ephemeral port, driven by an rmcp client.

mod mcp_client;
