//! Query Executor Module
//!
//! Drives queries through their lifecycle (CREATE, PLAN, PREDICT, NEXT, CANCEL, CLOSE)
//! across a fleet of executors sharing one task store and one notification bus.
//!
//! ## Architecture Overview
//! 1. **Submission**: `QueryService` validates the request, stores a `Queued` task, and
//!    announces it on the notification bus. PLAN and PREDICT are answered inline.
//! 2. **Dispatch**: every executor hears the announcement; its workers race for it.
//! 3. **Claiming**: a worker takes the query lock, re-reads the task, and marks it
//!    `Running` under a lease. The loser finds it no longer claimable and skips it.
//! 4. **Execution**: NEXT checks out a connection and a scan, fills one page, and publishes
//!    it to the query's results channel. CANCEL interrupts an in-flight NEXT.
//! 5. **Recovery**: a crashed executor's lease runs out; the find-work monitor republishes
//!    the task and another executor resumes from the stored checkpoint.
//!
//! ## Submodules
//! - **`executor`**: the worker pool and the per-method state machine.
//! - **`service`**: client entry point (create, submit, status, results).
//! - **`collaborators`**: planner and scanner traits plus in-memory implementations.
//! - **`registry`**: query logic name to planner.
//! - **`protocol`** / **`handlers`**: the HTTP API.

pub mod collaborators;
pub mod executor;
pub mod handlers;
pub mod protocol;
pub mod registry;
pub mod service;
pub mod types;
