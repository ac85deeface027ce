//! # Server Components
//!
//! ## State ([`node`])
//! One [`ServerNode`] per process owns the membership table ([`membership`]),
//! the ring election vote ([`election`]) and the leader-only client
//! registry ([`registry`]). It is pure: handlers return work, never send.
//!
//! ## Middleware ([`middleware`])
//! Owns the sockets and timers: discovery beacons, group and unicast
//! listeners, leader-loss monitor, reaper, heartbeats and token walks.

pub mod config;
pub mod election;
pub mod membership;
pub mod middleware;
pub mod node;
pub mod registry;

pub use config::ServerConfig;
pub use middleware::ServerMiddleware;
pub use node::ServerNode;
