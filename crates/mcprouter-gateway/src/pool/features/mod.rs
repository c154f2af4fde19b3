//! Namespaced capability catalog
//!
//! - **Namespace**: the `<alias><separator><name>` convention
//! - **CapabilityAggregator**: alias registry plus copy-on-write catalog

mod aggregator;
mod namespace;

pub use aggregator::{BackendCatalog, CapabilityAggregator, CatalogEntry, CatalogSnapshot, Resolved};
pub use namespace::Namespace;
