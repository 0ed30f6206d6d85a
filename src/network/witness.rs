//! Witness requester: headers fetched from a different peer
//!
//! Identical state machine to [`crate::network::requester::Requester`],
//! parameterized over `BlockHeader` instead of `Block` and carrying an
//! `excluded_peer` that peer selection must never return.
//!
//! `excluded_peer` is captured once at construction, from the block
//! requester's *currently* assigned peer, which at the instant both
//! requesters are created together is always empty. The exclusion
//! therefore only ever bites if a caller builds a witness requester
//! after its block requester has already picked a peer; the
//! scheduler's default construction order means this is a preserved
//! quirk rather than a bug (see DESIGN.md).

use std::sync::Mutex;

use tokio_util::sync::CancellationToken;

use crate::core::{BlockHeader, Height};
use crate::network::message::{HeaderRequest, OutboundSink};
use crate::network::peer::PeerId;
use crate::network::pool::BlockPoolInner;
use crate::network::pulse::PulseSlot;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WitnessState {
    Unassigned,
    Awaiting,
    Delivered,
    Stopped,
}

struct Inner {
    state: WitnessState,
    peer: Option<PeerId>,
    header: Option<BlockHeader>,
}

pub struct WitnessRequester {
    height: Height,
    pool: Arc<BlockPoolInner>,
    excluded_peer: Option<PeerId>,
    inner: Mutex<Inner>,
    redo_slot: PulseSlot<PeerId>,
    delivered: tokio::sync::Notify,
    cancel: CancellationToken,
}

impl WitnessRequester {
    pub fn new(
        height: Height,
        pool: Arc<BlockPoolInner>,
        excluded_peer: Option<PeerId>,
        parent: &CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            height,
            pool,
            excluded_peer,
            inner: Mutex::new(Inner {
                state: WitnessState::Unassigned,
                peer: None,
                header: None,
            }),
            redo_slot: PulseSlot::new(),
            delivered: tokio::sync::Notify::new(),
            cancel: parent.child_token(),
        })
    }

    pub fn height(&self) -> Height {
        self.height
    }

    pub fn state(&self) -> WitnessState {
        self.inner.lock().unwrap().state
    }

    pub fn assigned_peer(&self) -> Option<PeerId> {
        self.inner.lock().unwrap().peer
    }

    pub fn header(&self) -> Option<BlockHeader> {
        self.inner.lock().unwrap().header.clone()
    }

    pub fn excluded_peer(&self) -> Option<PeerId> {
        self.excluded_peer
    }

    pub fn redo(&self, peer: PeerId) {
        self.redo_slot.pulse(peer);
    }

    pub fn stop(&self) {
        self.cancel.cancel();
        self.inner.lock().unwrap().state = WitnessState::Stopped;
    }

    /// Same acceptance contract as the block requester: no header
    /// stored yet, and the delivering peer matches the assignment.
    pub fn set_header(&self, peer: PeerId, header: BlockHeader) -> bool {
        let accepted = {
            let mut g = self.inner.lock().unwrap();
            if g.header.is_none() && g.peer == Some(peer) {
                g.header = Some(header);
                g.state = WitnessState::Delivered;
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

    pub async fn run(self: Arc<Self>, sink: OutboundSink<HeaderRequest>) {
        loop {
            let peer = match self.pick_peer().await {
                Some(p) => p,
                None => return,
            };

            {
                let mut g = self.inner.lock().unwrap();
                g.peer = Some(peer);
                g.state = WitnessState::Awaiting;
            }
            log::trace!("witness for height {} assigned to peer {peer}", self.height);
            sink.send(HeaderRequest {
                height: self.height,
                peer,
            })
            .await;

            if !self.wait_for_redo_or_stop(peer).await {
                return;
            }
        }
    }

    async fn pick_peer(&self) -> Option<PeerId> {
        loop {
            if self.cancel.is_cancelled() {
                self.inner.lock().unwrap().state = WitnessState::Stopped;
                return None;
            }
            if let Some(p) = self.pool.select_peer_for(self.height, self.excluded_peer).await {
                debug_assert_ne!(Some(p), self.excluded_peer);
                return Some(p);
            }
            tokio::select! {
                _ = tokio::time::sleep(self.pool.request_interval()) => {}
                _ = self.cancel.cancelled() => {
                    self.inner.lock().unwrap().state = WitnessState::Stopped;
                    return None;
                }
            }
        }
    }

    async fn wait_for_redo_or_stop(&self, peer: PeerId) -> bool {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    self.inner.lock().unwrap().state = WitnessState::Stopped;
                    return false;
                }
                redo_peer = self.redo_slot.wait() => {
                    match redo_peer {
                        Some(p) if p == peer => {
                            // Witness deliveries never touch the pool's
                            // global in-flight counter, which tracks
                            // only block requesters, so there's nothing
                            // to restore here beyond clearing assignment.
                            let mut g = self.inner.lock().unwrap();
                            g.header = None;
                            g.peer = None;
                            g.state = WitnessState::Unassigned;
                            drop(g);
                            return true;
                        }
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

    #[tokio::test]
    async fn excluded_peer_never_selected() {
        let pool = new_pool();
        let cancel = CancellationToken::new();
        let excluded = addr(1);
        let w = WitnessRequester::new(Height(1), pool.clone(), Some(excluded), &cancel);
        assert_eq!(w.excluded_peer(), Some(excluded));
        // No peers registered yet: selection returns None regardless.
        assert_eq!(pool.select_peer_for(Height(1), w.excluded_peer()).await, None);
    }

    #[test]
    fn set_header_rejected_without_matching_peer() {
        let pool = new_pool();
        let cancel = CancellationToken::new();
        let w = WitnessRequester::new(Height(1), pool, None, &cancel);
        let header = BlockHeader::new(Height(1), "h".into(), vec![]);
        assert!(!w.set_header(addr(1), header));
    }
}
