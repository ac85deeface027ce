//! LAN group chat with self-organizing servers.
//!
//! Servers find each other over a multicast group, elect one leader with a
//! ring token, and the leader relays chat between connected clients. When
//! the leader goes quiet the survivors elect a new one and clients rejoin.

pub mod client;
pub mod common;
pub mod server;
