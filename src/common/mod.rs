//! # Common Components
//!
//! Shared utilities and data structures used by both client and server components.
//!
//! ## Modules
//!
//! - [`messages`]: Datagram message definitions exchanged over the group and unicast sockets
//! - [`transport`]: UDP socket setup and datagram send/receive helpers
//! - [`config`]: Configuration parsing utilities and shared network/timing settings
//! - [`watch`]: Leader-signal tracking used by both servers and clients
//! - [`error`]: Library error type
//! - [`logging`]: Logger initialisation for the binaries

pub mod config;
pub mod error;
pub mod logging;
pub mod messages;
pub mod transport;
pub mod watch;
