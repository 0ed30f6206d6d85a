//! Tunable constants for the block pool
//!
//! Free-standing `pub const` defaults for call sites that want them
//! directly, bundled into a `PoolConfig` for callers that want to
//! override a subset.

use std::time::Duration;

/// Sleep between peer-picking retries and scheduler back-off ticks.
pub const REQUEST_INTERVAL_MS: u64 = 2;

/// Hard cap on concurrently live requesters (block + witness share this
/// budget one-for-one, since they're created together).
pub const MAX_TOTAL_REQUESTERS: usize = 600;

/// Hard cap on blocks awaiting delivery at once.
pub const MAX_PENDING_REQUESTS: usize = 600;

/// Hard cap on in-flight requests to a single peer.
pub const MAX_PENDING_REQUESTS_PER_PEER: u32 = 20;

/// Bound on the outbound peer-error queue.
pub const MAX_PEER_ERR_BUFFER: usize = 1000;

/// Minimum acceptable receive rate, bytes/sec.
pub const MIN_RECV_RATE: f64 = 7680.0;

/// How long a peer may hold an in-flight request without sending bytes.
pub const PEER_TIMEOUT: Duration = Duration::from_secs(15);

/// Window, in heights, outside of which an unsolicited block is flagged
/// as a peer error instead of silently dropped.
pub const MAX_DIFF_BETWEEN_CURRENT_AND_RECEIVED_BLOCK_HEIGHT: i64 = 100;

/// Number of pops between `last_sync_rate` EMA updates.
pub const SYNC_RATE_SAMPLE_SIZE: u64 = 100;

/// Runtime-overridable bundle of the constants above.
///
/// Most callers can use [`PoolConfig::default`]; tests that want to
/// exercise eviction or backpressure paths without waiting out the real
/// timeouts construct a custom one.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub request_interval: Duration,
    pub max_total_requesters: usize,
    pub max_pending_requests: usize,
    pub max_pending_requests_per_peer: u32,
    pub max_peer_err_buffer: usize,
    pub min_recv_rate: f64,
    pub peer_timeout: Duration,
    pub max_diff_between_current_and_received_block_height: i64,
    pub sync_rate_sample_size: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            request_interval: Duration::from_millis(REQUEST_INTERVAL_MS),
            max_total_requesters: MAX_TOTAL_REQUESTERS,
            max_pending_requests: MAX_PENDING_REQUESTS,
            max_pending_requests_per_peer: MAX_PENDING_REQUESTS_PER_PEER,
            max_peer_err_buffer: MAX_PEER_ERR_BUFFER,
            min_recv_rate: MIN_RECV_RATE,
            peer_timeout: PEER_TIMEOUT,
            max_diff_between_current_and_received_block_height:
                MAX_DIFF_BETWEEN_CURRENT_AND_RECEIVED_BLOCK_HEIGHT,
            sync_rate_sample_size: SYNC_RATE_SAMPLE_SIZE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_constants() {
        let cfg = PoolConfig::default();
        assert_eq!(cfg.max_total_requesters, 600);
        assert_eq!(cfg.max_pending_requests_per_peer, 20);
        assert_eq!(cfg.min_recv_rate, 7680.0);
        assert_eq!(cfg.peer_timeout, Duration::from_secs(15));
    }
}
