//! # pulse-queue
//!
//! Ingress priority queue and batched off-loop processing:
//!
//! - **[`PriorityMessageQueue`]**: named in-process queues with strict
//!   priority ordering (arrival order breaks ties), per-message TTL, and
//!   capacity rejection as a plain `bool`
//! - **[`PriorityStore`]**: the narrow push/pop contract an external backing
//!   store (e.g. a Redis sorted set) can implement in place of the in-memory
//!   queue
//! - **[`BatchProcessor`]**: drains batches into a bounded worker pool and
//!   memoizes results in the cache under `result:<message_id>`

#![deny(unsafe_code)]

pub mod batch;
pub mod queue;
pub mod store;

pub use batch::{BatchError, BatchHandler, BatchProcessor};
pub use queue::{PriorityMessageQueue, QueuedMessage};
pub use store::PriorityStore;
