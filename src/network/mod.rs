//! Block synchronization core
//!
//! Tracks peer reachability and advertised ranges, balances block and
//! header requests across peers under per-peer and global in-flight
//! caps, detects misbehaving or unresponsive peers, and exposes blocks
//! to a downstream consumer in strict ascending order with two-block
//! lookahead. The wire codec, peer transport, storage and verification
//! all live outside this module.

mod message;
mod peer;
mod pool;
mod pulse;
mod rate;
mod requester;
mod witness;

pub use message::{BlockRequest, HeaderRequest, OutboundSink, PeerError};
pub use peer::PeerId;
pub use pool::BlockPool;

// Requester, WitnessRequester and PeerRecord are intentionally not
// re-exported: the pool exclusively owns them and no external
// reference to them is meant to escape.
