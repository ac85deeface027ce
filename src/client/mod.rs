//! # Client Components
//!
//! The client is split into two main components:
//!
//! ## Leader Link ([`link`])
//! Pure state machine for the connection to the current leader: searching,
//! connected or reconnecting, and when a (re)join is due.
//!
//! ## Client Middleware ([`middleware`])
//! Owns the sockets and runs the loops:
//! - Leader discovery from multicast leadership signals
//! - Join/rejoin and best-effort leave
//! - Heartbeat-loss detection
//! - Delivery of welcomes, relayed messages and notices as [`ChatEvent`]s

pub mod config;
pub mod link;
pub mod middleware;

// Re-export for convenience
pub use config::ClientConfig;
pub use link::{LeaderLink, LinkStatus};
pub use middleware::{ChatEvent, ClientMiddleware};
