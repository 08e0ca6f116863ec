//! Query Vocabulary
//!
//! Identifiers, lifecycle methods and the immutable `QueryRequest` shared by the store,
//! the notification channel and the executor, plus the definition and plan records the
//! planner collaborator consumes and produces.

pub mod types;

#[cfg(test)]
mod tests;
