//! Error types for the block pool
//!
//! Almost nothing in this crate fails visibly: protocol
//! violations, slow peers and timeouts all surface as `PeerError`
//! messages on the outbound sink, not as `Result::Err`. `PoolError` is
//! reserved for the one precondition the contract treats as a fatal
//! programmer error.

use thiserror::Error;

use crate::core::Height;

#[derive(Error, Debug)]
pub enum PoolError {
    /// `pop()` was called with no requester registered at the current
    /// base height. A correctly-driven pool always has a requester at
    /// its own base height; raising this loudly beats silently skipping
    /// a height.
    #[error("pop() called with no requester at height {height}")]
    MissingRequester { height: Height },
}
