//! Batching accumulator.
//!
//! Collects items from any number of concurrent producers and hands them to a
//! single [`BatchFlusher`] in bounded batches. A batch is flushed as soon as it
//! reaches the configured size or the flush interval passes with items
//! pending, whichever comes first.
//!
//! Producers either fire and forget ([`Accumulator::add_async`]) or wait for
//! the flush of their batch ([`Accumulator::add_sync`]). [`Accumulator::stop`]
//! drains everything already accepted before returning.
//!
//! Everything is in memory; nothing survives a restart.

mod accumulator;
mod builder;
mod config;
mod context;
mod engine;
mod error;
mod event;
mod flusher;
mod pool;
mod status;
mod storage;

pub use accumulator::Accumulator;
pub use builder::AccumulatorBuilder;
pub use config::{
    AccumulatorConfig, DEFAULT_FLUSH_INTERVAL_MS, DEFAULT_FLUSH_SIZE, MAX_FLUSH_SIZE,
};
pub use context::Context;
pub use error::{AccumulatorError, AccumulatorResult, ExpiryReason, ExpiryStage};
pub use flusher::{BatchFlusher, NoopFlusher};
pub use pool::{BufferPool, PooledVec, DEFAULT_MAX_RETAINED};
pub use status::{AccumulatorStatus, EnginePhase};
pub use storage::EventStorage;
