//! Execution support for the asynchronous cache API.
//!
//! - [`work_queue`]: parallel task executor for async operations
//! - [`background`]: host suspension protection for long operations

pub mod background;
pub mod work_queue;
