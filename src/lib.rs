//! Distributed Query Execution Core
//!
//! This library crate defines the modules of a query executor fleet. It serves as the
//! foundation for the binary executable (`main.rs`).
//!
//! ## Architecture Modules
//! - **`executor`**: query lifecycle (CREATE, PLAN, PREDICT, NEXT, CANCEL, CLOSE) run by a
//!   pool of workers under per-query leased locks, plus the HTTP front door.
//! - **`storage`**: the query task store, with in-memory and file-backed persistence.
//! - **`coordination`**: leased distributed locks and counting semaphores.
//! - **`pool`**: priority-tiered connection pools.
//! - **`notification`**: fleet-wide task announcements, in-process or over HTTP.
//! - **`monitor`**: the find-work monitor that republishes lost tasks.
//! - **`results`**: per-query result streams with claim-check for oversized pages.
//! - **`ivarator`**: cache directory selection by priority and free space.
//! - **`query`**, **`config`**, **`clock`**, **`error`**: shared types and plumbing.

pub mod clock;
pub mod config;
pub mod coordination;
pub mod error;
pub mod executor;
pub mod ivarator;
pub mod monitor;
pub mod notification;
pub mod pool;
pub mod query;
pub mod results;
pub mod storage;
