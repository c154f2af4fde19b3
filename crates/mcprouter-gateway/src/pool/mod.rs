//! Backend pool
//!
//! - **Transport / TransportFactory**: stdio, remote (streamable HTTP), custom
//! - **Session**: one live JSON-RPC connection, pending table, read loop
//! - **SessionManager**: lifecycle, backoff, probes, drain
//! - **CapabilityAggregator**: namespaced catalog (`features`)
//! - **Dispatcher**: resolves names and correlates replies

mod backoff;
mod correlation;
pub mod features;
pub mod protocol;
mod routing;
mod server_manager;
mod session;
pub mod transport;

pub use backoff::Backoff;
pub use correlation::{CorrelationEntry, CorrelationTable};
pub use features::{CapabilityAggregator, CatalogSnapshot, Namespace, Resolved};
pub use routing::{CallerContext, DispatchRequest, Dispatcher, TargetField};
pub use server_manager::{BackendStatus, SessionManager, SessionManagerConfig, StartOutcome};
pub use session::{ProgressRoute, ProgressSink, RequestOptions, Session, SessionSignal};
pub use transport::{
    BackendLink, ConnectorRegistry, CustomConnector, LinkEvent, Transport, TransportFactory,
};
