//! Coordination Module
//!
//! Distributed mutual exclusion and counting semaphores. Every exclusivity guarantee in
//! the executor fleet comes from here: the per-query lock serialises NEXT, CANCEL and
//! CLOSE for one query while unrelated queries proceed in parallel.
//!
//! ## Submodules
//! - **`service`**: the `CoordinationService` lease table and its in-process implementation.
//! - **`file`**: the same table in a shared directory, for executors in separate processes.
//! - **`lock`**: leased locks (`try_lock`, bounded and unbounded waits) and the scoped guard.
//! - **`semaphore`**: named counting permits with bounded waits and draining.
//! - **`types`**: lease records and the query-scoped naming scheme.

pub mod file;
pub mod lock;
pub mod semaphore;
pub mod service;
pub mod types;

#[cfg(test)]
mod tests;
