//! Ivarator Cache Directory Selector
//!
//! Chooses where an ivarator spills intermediate results to disk, from a priority
//! ordered list of candidate directories with free-space thresholds.

pub mod selector;
pub mod types;

#[cfg(test)]
mod tests;
