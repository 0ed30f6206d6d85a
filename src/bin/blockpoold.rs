//! Standalone demo harness for `block_pool`.
//!
//! Wires a [`BlockPool`] to an in-memory peer simulator instead of a real
//! transport: each simulated peer answers block/header requests after a
//! random delay, occasionally drops a request on the floor to exercise
//! the idle-timeout path. Useful for watching the scheduler behave
//! end-to-end without a live network. Not part of the library's public
//! API.

use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;

use block_pool::config::PoolConfig;
use block_pool::core::{Block, BlockHeader, Height};
use block_pool::network::BlockPool;

/// A fake remote that owns blocks `[base, tip]` and answers requests with
/// jittered latency. `drop_rate` is the fraction of requests it silently
/// ignores, simulating a peer that goes quiet.
#[derive(Clone, Copy)]
struct SimPeer {
    addr: std::net::SocketAddr,
    base: Height,
    tip: Height,
    min_latency_ms: u64,
    max_latency_ms: u64,
    drop_rate: f64,
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let cfg = PoolConfig::default();
    let (pool, mut block_requests, mut header_requests, mut peer_errors) = BlockPool::new(Height(1), cfg);

    let peers = vec![
        SimPeer {
            addr: "127.0.0.1:9001".parse().unwrap(),
            base: Height(1),
            tip: Height(250),
            min_latency_ms: 5,
            max_latency_ms: 30,
            drop_rate: 0.0,
        },
        SimPeer {
            addr: "127.0.0.1:9002".parse().unwrap(),
            base: Height(1),
            tip: Height(250),
            min_latency_ms: 20,
            max_latency_ms: 120,
            drop_rate: 0.05,
        },
    ];
    for peer in &peers {
        pool.set_peer_range(peer.addr, peer.base, peer.tip).await;
        log::info!("registered peer {} covering [{}, {}]", peer.addr, peer.base, peer.tip);
    }

    let block_pool = pool.clone();
    tokio::spawn(async move {
        while let Some(req) = block_requests.recv().await {
            let Some(peer) = peers.iter().find(|p| p.addr == req.peer).copied() else {
                continue;
            };
            let block_pool = block_pool.clone();
            tokio::spawn(async move {
                if rand::thread_rng().gen_bool(peer.drop_rate) {
                    log::debug!("peer {} dropped block request for height {}", peer.addr, req.height);
                    return;
                }
                let delay = rand::thread_rng().gen_range(peer.min_latency_ms..=peer.max_latency_ms);
                sleep(Duration::from_millis(delay)).await;
                let payload = vec![0u8; 512];
                let size = payload.len();
                let previous = format!("hash-{}", req.height.get().saturating_sub(1));
                let block = Block::new(req.height, format!("hash-{}", req.height), previous, payload);
                block_pool.add_block(req.peer, block, size).await;
            });
        }
    });

    let header_pool = pool.clone();
    tokio::spawn(async move {
        while let Some(req) = header_requests.recv().await {
            let header_pool = header_pool.clone();
            tokio::spawn(async move {
                sleep(Duration::from_millis(rand::thread_rng().gen_range(2..=15))).await;
                let header = BlockHeader::new(req.height, format!("hash-{}", req.height), vec![0u8; 64]);
                header_pool.add_header(req.peer, header).await;
            });
        }
    });

    tokio::spawn(async move {
        while let Some(err) = peer_errors.recv().await {
            log::warn!("peer {}: {}", err.peer, err.err);
        }
    });

    let target = pool.target_blocks().await;
    log::info!("syncing toward {target} blocks");

    loop {
        let (b0, _b1) = pool.peek_two().await;
        if b0.is_some() {
            match pool.pop().await {
                Ok(Some(block)) => log::info!("delivered block {} ({} bytes)", block.height, block.serialized_size()),
                Ok(None) => unreachable!("peek_two confirmed a block at h0"),
                Err(e) => {
                    log::error!("pop failed: {e}");
                    break;
                }
            }
        } else if pool.is_caught_up().await {
            log::info!(
                "caught up at height {} (sync rate: {:?} blocks/s)",
                pool.base_height().await,
                pool.last_sync_rate().await
            );
            break;
        } else {
            sleep(Duration::from_millis(10)).await;
        }
    }

    pool.shutdown();
}
