//! Block pool: the sync core of a replicated blockchain node
//!
//! Given a starting height and a dynamic set of remote peers that
//! self-report the block range they hold, [`network::BlockPool`]
//! downloads contiguous blocks up to the highest reported peer tip,
//! hands them to a consumer in strict ascending order, and reports when
//! the node has caught up so the consumer can transition to live
//! consensus.
//!
//! # Example
//!
//! ```no_run
//! use block_pool::config::PoolConfig;
//! use block_pool::core::Height;
//! use block_pool::network::BlockPool;
//!
//! # async fn run() {
//! let (pool, mut block_requests, mut header_requests, mut peer_errors) =
//!     BlockPool::new(Height(1), PoolConfig::default());
//!
//! pool.set_peer_range("127.0.0.1:9000".parse().unwrap(), Height(1), Height(100)).await;
//!
//! if let Some(req) = block_requests.recv().await {
//!     println!("fetch block {} from {}", req.height, req.peer);
//! }
//! # }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod network;

pub use config::PoolConfig;
pub use core::{Block, BlockHeader, Height};
pub use error::PoolError;
pub use network::BlockPool;
