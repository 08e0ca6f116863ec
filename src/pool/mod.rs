//! Connection Pool Module
//!
//! Rations the scarce backend storage connections. Pools are named credential sets,
//! each split into priority tiers sized from configuration at startup.
//!
//! ## Submodules
//! - **`types`**: `Priority`, the ordered `ConnectionPool` key, and the `Connection` handle.
//! - **`allocator`**: the bounded per-tier allocator with timeouts and usage listing.

pub mod allocator;
pub mod types;
