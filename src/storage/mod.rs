//! Query Task Store
//!
//! Durable record of every task and every query's status, shared by all executors.
//!
//! ## Core Concepts
//! - **Backend**: `TaskBackend` is the durable layer. `MemoryTaskBackend` partitions
//!   records by task id hash; `FileTaskBackend` keeps one JSON file per record.
//! - **Cache**: `QueryTaskStore` fronts the backend with a read-through cache and drops
//!   the whole cache when the backend fails a read.
//! - **Cursor**: `find_tasks` / `scan_tasks` return a lazy, restartable `TaskCursor`.
//! - **Atomicity**: single record only. Callers mutate a query's records while holding
//!   that query's lock.

pub mod backend;
pub mod file;
pub mod memory;
pub mod partitioner;
pub mod store;
pub mod types;

#[cfg(test)]
mod tests;
