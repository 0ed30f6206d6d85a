//! Per-height requester state machine
//!
//! One `Requester` drives acquisition of exactly one block height: pick
//! an eligible peer, emit a request, wait for delivery or a redo. The
//! conceptual `Unassigned / Awaiting / Delivered / Redo / Stopped`
//! states collapse into a two-phase loop here: once a peer is assigned,
//! "Awaiting" and "Delivered" are the same wait (on a matching redo or
//! cancellation), and only whether `block` is set distinguishes them to
//! an outside observer such as `peek_two`.

use std::sync::Mutex;

use tokio_util::sync::CancellationToken;

use crate::core::{Block, Height};
use crate::network::message::{BlockRequest, OutboundSink};
use crate::network::peer::PeerId;
use crate::network::pool::BlockPoolInner;
use crate::network::pulse::PulseSlot;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequesterState {
    Unassigned,
    Awaiting,
    Delivered,
    Stopped,
}

struct Inner {
    state: RequesterState,
    peer: Option<PeerId>,
    block: Option<Block>,
}

/// Coordinates acquisition of the block at `height`.
pub struct Requester {
    height: Height,
    pool: Arc<BlockPoolInner>,
    inner: Mutex<Inner>,
    redo_slot: PulseSlot<PeerId>,
    /// Pulsed on acceptance of a delivered block. Not consumed by the
    /// run loop itself (redo is what ends the wait); exposed so a
    /// consumer that wants to await rather than poll `peek_two` has
    /// something to wait on.
    delivered: tokio::sync::Notify,
    cancel: CancellationToken,
}

impl Requester {
    pub fn new(height: Height, pool: Arc<BlockPoolInner>, parent: &CancellationToken) -> Arc<Self> {
        Arc::new(Self {
            height,
            pool,
            inner: Mutex::new(Inner {
                state: RequesterState::Unassigned,
                peer: None,
                block: None,
            }),
            redo_slot: PulseSlot::new(),
            delivered: tokio::sync::Notify::new(),
            cancel: parent.child_token(),
        })
    }

    pub fn height(&self) -> Height {
        self.height
    }

    pub fn state(&self) -> RequesterState {
        self.inner.lock().unwrap().state
    }

    pub fn assigned_peer(&self) -> Option<PeerId> {
        self.inner.lock().unwrap().peer
    }

    pub fn block(&self) -> Option<Block> {
        self.inner.lock().unwrap().block.clone()
    }

    pub fn has_block(&self) -> bool {
        self.inner.lock().unwrap().block.is_some()
    }

    /// Requests that the requester drop its assignment to `peer`, iff
    /// it is still assigned to that peer. Non-blocking; coalesces with
    /// any already-pending redo.
    pub fn redo(&self, peer: PeerId) {
        self.redo_slot.pulse(peer);
    }

    /// Stops the requester deterministically (pool teardown on `pop`
    /// or shutdown).
    pub fn stop(&self) {
        self.cancel.cancel();
        self.inner.lock().unwrap().state = RequesterState::Stopped;
    }

    /// Accepts a delivered block iff no block is stored yet and the
    /// delivering peer matches the assignment. Returns whether the
    /// block was accepted; callers emit a peer-error on rejection.
    pub fn set_block(&self, peer: PeerId, block: Block) -> bool {
        let accepted = {
            let mut g = self.inner.lock().unwrap();
            if g.block.is_none() && g.peer == Some(peer) {
                g.block = Some(block);
                g.state = RequesterState::Delivered;
                true
            } else {
                false
            }
        };
        if accepted {
            self.delivered.notify_one();
        }
        accepted
    }

    /// Runs the pick-request-wait loop until stopped. Spawned once per
    /// requester by the pool's scheduler.
    pub async fn run(self: Arc<Self>, sink: OutboundSink<BlockRequest>) {
        loop {
            let peer = match self.pick_peer().await {
                Some(p) => p,
                None => return, // cancelled while picking
            };

            {
                let mut g = self.inner.lock().unwrap();
                g.peer = Some(peer);
                g.state = RequesterState::Awaiting;
            }
            log::trace!("height {} assigned to peer {peer}", self.height);
            sink.send(BlockRequest {
                height: self.height,
                peer,
            })
            .await;

            if !self.wait_for_redo_or_stop(peer).await {
                return; // cancelled
            }
            // matching redo arrived: loop back to Unassigned peer-picking
        }
    }

    /// Peer selection: repeatedly asks the pool for an eligible peer,
    /// backing off `requestIntervalMS` between tries. Returns `None`
    /// only if cancelled while waiting.
    async fn pick_peer(&self) -> Option<PeerId> {
        loop {
            if self.cancel.is_cancelled() {
                self.inner.lock().unwrap().state = RequesterState::Stopped;
                return None;
            }
            if let Some(p) = self.pool.select_peer_for(self.height, None).await {
                return Some(p);
            }
            tokio::select! {
                _ = tokio::time::sleep(self.pool.request_interval()) => {}
                _ = self.cancel.cancelled() => {
                    self.inner.lock().unwrap().state = RequesterState::Stopped;
                    return None;
                }
            }
        }
    }

    /// Waits for a redo matching `peer` or cancellation. Returns `true`
    /// if a matching redo arrived (assignment cleared, ready to
    /// re-pick); `false` if cancelled.
    async fn wait_for_redo_or_stop(&self, peer: PeerId) -> bool {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    self.inner.lock().unwrap().state = RequesterState::Stopped;
                    return false;
                }
                redo_peer = self.redo_slot.wait() => {
                    match redo_peer {
                        Some(p) if p == peer => {
                            let had_block = {
                                let mut g = self.inner.lock().unwrap();
                                let had = g.block.take().is_some();
                                g.peer = None;
                                g.state = RequesterState::Unassigned;
                                had
                            };
                            if had_block {
                                self.pool.bump_in_flight();
                            }
                            log::debug!("height {} redone off peer {p}", self.height);
                            return true;
                        }
                        // Stale redo for a peer we've already moved off of,
                        // or the slot was emptied by a spurious wakeup.
                        _ => continue,
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use crate::network::pool::BlockPoolInner;

    fn addr(port: u16) -> PeerId {
        format!("127.0.0.1:{port}").parse().unwrap()
    }

    fn new_pool() -> Arc<BlockPoolInner> {
        BlockPoolInner::new(Height(1), PoolConfig::default())
    }

    #[test]
    fn redo_ignored_when_unassigned_has_no_peer() {
        let pool = new_pool();
        let cancel = CancellationToken::new();
        let r = Requester::new(Height(1), pool, &cancel);
        assert_eq!(r.state(), RequesterState::Unassigned);
        r.redo(addr(1));
        assert_eq!(r.state(), RequesterState::Unassigned);
    }

    #[test]
    fn set_block_rejected_without_matching_peer() {
        let pool = new_pool();
        let cancel = CancellationToken::new();
        let r = Requester::new(Height(1), pool, &cancel);
        let block = Block::new(Height(1), "h".into(), "p".into(), vec![]);
        assert!(!r.set_block(addr(1), block));
    }

    #[test]
    fn set_block_idempotent_after_acceptance() {
        let pool = new_pool();
        let cancel = CancellationToken::new();
        let r = Requester::new(Height(1), pool, &cancel);
        r.inner.lock().unwrap().peer = Some(addr(1));
        let block = Block::new(Height(1), "h".into(), "p".into(), vec![]);
        assert!(r.set_block(addr(1), block.clone()));
        assert!(!r.set_block(addr(1), block));
    }
}
