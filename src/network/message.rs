//! Outbound messages the pool emits, and the sinks that carry them
//!
//! The wire codec and peer transport are out of scope for this crate:
//! what's here is the pool's side of the contract, namely the three
//! message shapes it produces, and a thin, channel-backed sink for
//! each.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::core::Height;
use crate::network::peer::PeerId;

/// Ask a peer for the block at `height`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRequest {
    pub height: Height,
    pub peer: PeerId,
}

/// Ask a peer for the header at `height`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderRequest {
    pub height: Height,
    pub peer: PeerId,
}

/// Advisory report of peer misbehavior or unresponsiveness. The
/// supervisor consuming this sink is expected to call
/// [`crate::network::pool::BlockPool::remove_peer`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerError {
    pub err: String,
    pub peer: PeerId,
}

/// A bounded, single-producer multi-consumer sink. The pool holds the
/// `Sender` side and never blocks indefinitely on a full queue: the
/// channel capacity is the backpressure budget.
#[derive(Clone)]
pub struct OutboundSink<T> {
    tx: mpsc::Sender<T>,
}

impl<T> OutboundSink<T> {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<T>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Sends `msg`, suspending if the queue is full. This is the one
    /// suspension point in the requester loop that may await external
    /// backpressure; no pool lock is held across it.
    pub async fn send(&self, msg: T) {
        // A closed receiver means the supervisor has gone away; dropping
        // the message is correct (nothing left to deliver it to).
        let _ = self.tx.send(msg).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sink_delivers_in_order() {
        let (sink, mut rx) = OutboundSink::<u32>::new(4);
        sink.send(1).await;
        sink.send(2).await;
        assert_eq!(rx.recv().await, Some(1));
        assert_eq!(rx.recv().await, Some(2));
    }
}
