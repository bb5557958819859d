//! tenant-relay: a tenant-isolating streaming relay in front of an agent runtime
//!
//! The binary in `main.rs` wires these modules together; tests drive the
//! router directly through [`proxy::router`].

pub mod audit;
pub mod cli;
pub mod config;
pub mod logging;
pub mod proxy;
pub mod util;
