//! Session lifecycle integration tests
//!
//! Startup retries and persistent errors, liveness probes, protocol faults
//! and graceful removal.

mod health;
mod removal;
mod startup;
