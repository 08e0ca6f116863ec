//! Results Channel
//!
//! Carries result pages from the executor running NEXT to whoever is reading them.
//!
//! ## Submodules
//! - **`types`**: `ResultPage` and the `Inline` / `ClaimCheck` envelope.
//! - **`channel`**: bounded per-query FIFO (`ResultsChannel`) and the `ResultsManager`
//!   registry.
//! - **`claim_check`**: payload stores (memory, directory) and the redeeming callback.
//! - **`listener`**: push-style consumption via `ResultsListener`.

pub mod channel;
pub mod claim_check;
pub mod listener;
pub mod types;

#[cfg(test)]
mod tests;
