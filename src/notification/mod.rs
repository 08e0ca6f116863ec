//! Task Notification Channel
//!
//! Fleet-wide broadcast telling executors that a task is waiting.
//!
//! ## Submodules
//! - **`types`**: `QueryTaskNotification` and the `Ack`/`Nack` publish outcome.
//! - **`channel`**: the `TaskNotificationChannel` trait and `NotificationSubscription`,
//!   which drops the subscriber's own publications and skips over lag.
//! - **`local`**: tokio broadcast hub for executors sharing a process.
//! - **`http`**: peer fan-out over HTTP with retry, backoff and jitter.
//!
//! Notifications are hints. Consumers re-read the task from the store before acting,
//! and the find-work monitor covers anything lost in transit.

pub mod channel;
pub mod http;
pub mod local;
pub mod types;

#[cfg(test)]
mod tests;
