//! Domain entities

mod config;
mod event;
mod profile;
mod server;

pub use config::*;
pub use event::*;
pub use profile::*;
pub use server::*;
