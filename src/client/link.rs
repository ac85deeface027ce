//! # Leader Link
//!
//! The client's view of its connection to the current leader, kept free of
//! sockets so every transition can be driven from tests.
//!
//! ```text
//!              leader signal                 timeout / send failure
//!  Searching ────────────────► Connected ──────────────────────────► Reconnecting
//!                                  ▲                                      │
//!                                  └──────── fresh leader signal ─────────┘
//! ```
//!
//! Outbound chat is only allowed while `Connected`.

use log::{info, warn};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::common::error::{ChatError, Result};
use crate::common::messages::ServerId;
use crate::common::watch::LeaderWatch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    /// No leader seen yet.
    Searching,
    /// Joined (or joining) a live leader.
    Connected,
    /// The leader went quiet or a socket failed; waiting for a fresh signal.
    Reconnecting,
}

#[derive(Debug, Clone)]
pub struct LeaderLink {
    status: LinkStatus,
    leader: Option<(ServerId, SocketAddr)>,
    display_name: Option<String>,
    /// When the unanswered join went out; cleared by the welcome.
    join_sent_at: Option<Instant>,
    watch: LeaderWatch,
}

impl LeaderLink {
    pub fn new(timeout: Duration, now: Instant) -> Self {
        Self {
            status: LinkStatus::Searching,
            leader: None,
            display_name: None,
            join_sent_at: None,
            watch: LeaderWatch::new(timeout, now),
        }
    }

    pub fn status(&self) -> LinkStatus {
        self.status
    }

    pub fn leader(&self) -> Option<&ServerId> {
        self.leader.as_ref().map(|(id, _)| id)
    }

    /// Name assigned by the current leader, once welcomed.
    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    /// Record a leadership-flagged signal (heartbeat, announcement or
    /// flagged beacon).
    ///
    /// Returns the address to send a `join` to when the client has to
    /// (re)join: on the first leader, on a leader change, and when resuming
    /// from `Reconnecting`. Joins are idempotent at the leader, so resuming
    /// against the same identity is harmless and also covers a leader that
    /// restarted at the same address.
    pub fn observe_leader_signal(
        &mut self,
        identity: &ServerId,
        address: SocketAddr,
        now: Instant,
    ) -> Option<SocketAddr> {
        self.watch.observe(now);

        let changed = self.leader.as_ref().map(|(id, _)| id) != Some(identity);
        if !changed && self.status == LinkStatus::Connected {
            return None;
        }

        if changed {
            info!("👑 Leader is {} ({})", identity, address);
            self.display_name = None;
        } else {
            info!("🔄 Leader {} is back", identity);
        }
        self.leader = Some((identity.clone(), address));
        self.status = LinkStatus::Connected;
        self.join_sent_at = Some(now);
        Some(address)
    }

    /// A join that has gone unanswered for longer than `patience` is due
    /// again. Returns the leader to resend it to and restarts the wait.
    ///
    /// Only applies while `Connected`; a welcomed link never rejoins here.
    pub fn rejoin_due(&mut self, now: Instant, patience: Duration) -> Option<(ServerId, SocketAddr)> {
        if self.status != LinkStatus::Connected {
            return None;
        }
        let sent_at = self.join_sent_at?;
        if now.saturating_duration_since(sent_at) <= patience {
            return None;
        }
        self.join_sent_at = Some(now);
        self.leader.clone()
    }

    /// Leader-loss check. Returns `true` when this call moved the link
    /// into `Reconnecting`.
    pub fn check_timeout(&mut self, now: Instant) -> bool {
        if self.status != LinkStatus::Connected || !self.watch.expired(now) {
            return false;
        }
        warn!(
            "⚠️  No leader signal for {:.1}s; reconnecting",
            self.watch.age(now).as_secs_f64()
        );
        self.status = LinkStatus::Reconnecting;
        true
    }

    /// A send or receive on the leader link failed. Returns `true` when
    /// this call moved the link into `Reconnecting`.
    pub fn mark_link_failure(&mut self) -> bool {
        if self.status != LinkStatus::Connected {
            return false;
        }
        self.status = LinkStatus::Reconnecting;
        true
    }

    /// Where outbound chat goes, or [`ChatError::NotConnected`] while
    /// searching or reconnecting.
    pub fn outbound_target(&self) -> Result<SocketAddr> {
        match (&self.status, &self.leader) {
            (LinkStatus::Connected, Some((_, address))) => Ok(*address),
            _ => Err(ChatError::NotConnected),
        }
    }

    pub fn welcome(&mut self, name: impl Into<String>) {
        self.display_name = Some(name.into());
        self.join_sent_at = None;
    }
}
