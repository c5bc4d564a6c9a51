//! Gateway: the HTTP front door.
//!
//! One port serves the status page, the pairing endpoint, and the bridge webhook ingress that
//! feeds session event loops.

mod server;

pub use server::{router, run_gateway, serve, GatewayState, PAIR_USAGE};
