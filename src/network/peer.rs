//! Peer records tracked by the block pool
//!
//! A `PeerRecord` holds everything the pool needs to decide whether a
//! peer is eligible for a height, and to detect when it has gone slow
//! or silent: advertised range plus download bookkeeping for the same
//! peer, merged into one record since the pool owns both. Every method
//! here is meant to be called with the pool's write lock already held,
//! so plain fields mutated through `&mut self` are enough; no interior
//! mutability needed.

use std::net::SocketAddr;
use std::time::Instant;

use crate::config::PoolConfig;
use crate::core::Height;
use crate::network::rate::RecvRateMonitor;

/// Stable identity of a remote peer. The wire transport is out of
/// scope for this crate, so `SocketAddr` is reused directly rather
/// than inventing a new identity type.
pub type PeerId = SocketAddr;

/// Per-peer state the pool consults when picking a peer for a height
/// and when sweeping for unresponsive peers.
#[derive(Debug)]
pub struct PeerRecord {
    pub id: PeerId,
    base: Height,
    tip: Height,
    in_flight: u32,
    rate: Option<RecvRateMonitor>,
    /// Deadline after which, if still armed, the peer is considered
    /// silent. `None` while `in_flight == 0`.
    idle_deadline: Option<Instant>,
    timed_out: bool,
    created_at: Instant,
    min_recv_rate: f64,
    peer_timeout: std::time::Duration,
}

impl PeerRecord {
    pub fn new(id: PeerId, base: Height, tip: Height, cfg: &PoolConfig) -> Self {
        Self {
            id,
            base,
            tip,
            in_flight: 0,
            rate: None,
            idle_deadline: None,
            timed_out: false,
            created_at: Instant::now(),
            min_recv_rate: cfg.min_recv_rate,
            peer_timeout: cfg.peer_timeout,
        }
    }

    pub fn base(&self) -> Height {
        self.base
    }

    pub fn tip(&self) -> Height {
        self.tip
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn set_range(&mut self, base: Height, tip: Height) {
        self.base = base;
        self.tip = tip;
    }

    pub fn covers(&self, h: Height) -> bool {
        h >= self.base && h <= self.tip
    }

    pub fn in_flight(&self) -> u32 {
        self.in_flight
    }

    pub fn is_timed_out(&self) -> bool {
        self.timed_out
    }

    pub fn mark_timed_out(&mut self) {
        self.timed_out = true;
    }

    /// If the in-flight count was 0, (re)seeds the rate monitor and arms
    /// the idle timer; then increments. The first sample after a 0->1
    /// transition must not be able to immediately fail.
    pub fn increment_in_flight(&mut self) {
        if self.in_flight == 0 {
            self.rate = Some(RecvRateMonitor::seeded(self.min_recv_rate));
            self.idle_deadline = Some(Instant::now() + self.peer_timeout);
        }
        self.in_flight += 1;
    }

    /// Decrements in-flight; cancels the idle timer if it reaches 0,
    /// otherwise folds `received_bytes` into the rate monitor and
    /// resets the idle deadline.
    pub fn decrement_in_flight(&mut self, received_bytes: usize) {
        self.in_flight = self.in_flight.saturating_sub(1);
        if self.in_flight == 0 {
            self.idle_deadline = None;
        } else {
            if let Some(monitor) = self.rate.as_mut() {
                monitor.sample(received_bytes);
            }
            self.idle_deadline = Some(Instant::now() + self.peer_timeout);
        }
    }

    pub fn current_receive_rate(&self) -> f64 {
        self.rate.map(|m| m.current()).unwrap_or(0.0)
    }

    /// True if the idle timer is armed and its deadline has passed.
    /// Invoked by the pool's periodic sweep rather than a per-peer
    /// timer task. See DESIGN.md for why a shared sweep is sufficient.
    pub fn idle_timer_expired(&self) -> bool {
        match self.idle_deadline {
            Some(deadline) => Instant::now() >= deadline,
            None => false,
        }
    }

    /// True if bytes have been flowing but below the minimum rate. Only
    /// meaningful while a request is outstanding.
    pub fn is_slow(&self) -> bool {
        if self.in_flight == 0 {
            return false;
        }
        let rate = self.current_receive_rate();
        rate > 0.0 && rate < self.min_recv_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> PeerId {
        "127.0.0.1:9000".parse().unwrap()
    }

    #[test]
    fn increment_seeds_monitor_above_min_rate() {
        let cfg = PoolConfig::default();
        let mut p = PeerRecord::new(addr(), Height(1), Height(10), &cfg);
        assert_eq!(p.in_flight(), 0);
        p.increment_in_flight();
        assert_eq!(p.in_flight(), 1);
        assert!(p.current_receive_rate() > cfg.min_recv_rate);
        assert!(!p.idle_timer_expired());
    }

    #[test]
    fn decrement_to_zero_cancels_idle_timer() {
        let cfg = PoolConfig::default();
        let mut p = PeerRecord::new(addr(), Height(1), Height(10), &cfg);
        p.increment_in_flight();
        p.decrement_in_flight(1024);
        assert_eq!(p.in_flight(), 0);
        assert!(!p.idle_timer_expired());
    }

    #[test]
    fn covers_checks_inclusive_range() {
        let cfg = PoolConfig::default();
        let p = PeerRecord::new(addr(), Height(5), Height(10), &cfg);
        assert!(!p.covers(Height(4)));
        assert!(p.covers(Height(5)));
        assert!(p.covers(Height(10)));
        assert!(!p.covers(Height(11)));
    }

    #[test]
    fn is_slow_is_false_with_no_in_flight() {
        let cfg = PoolConfig::default();
        let p = PeerRecord::new(addr(), Height(1), Height(10), &cfg);
        assert!(!p.is_slow());
    }
}
