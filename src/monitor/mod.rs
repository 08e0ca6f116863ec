//! Find-Work Monitor Module
//!
//! Notifications are best effort: a bus hiccup or an executor crash can leave a task
//! nobody is going to run. The monitor scans the task store on a fixed period and
//! republishes those tasks so some executor picks them up.
//!
//! ## Submodules
//! - **`find_work`**: the monitor, its single-pass `tick` and the polling loop.

pub mod find_work;
