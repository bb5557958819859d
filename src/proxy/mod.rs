// Proxy module - tenant-isolating streaming relay to the agent runtime
//
// Every invocation runs the same pipeline (see `handler`): read the
// authorizer-verified identity, decode the body, enforce session binding,
// mint a tenant-scoped credential when isolation is configured, sign and
// send one request to the runtime, and relay its output as NDJSON while the
// audit recorder fingerprints both directions.

pub mod credentials;
pub mod envelope;
pub mod error;
pub mod handler;
pub mod isolation;
pub mod ndjson;
pub mod policy;
pub mod server;
pub mod signing;
pub mod state;
pub mod upstream;


pub use error::ProxyError;
pub use server::{router, start_proxy};
pub use state::ProxyState;
