//! AlarmWatch - multi-channel attack alarm notifier
//!
//! Periodically scans the attack events recorded for each monitored
//! application and fans new ones out to the mail, chat bot and webhook
//! channels the application has configured.

pub mod app;
pub mod cli;
pub mod config;
pub mod core;
pub mod formatting;
pub mod internal_metrics;
pub mod notification;
pub mod scheduler;
pub mod source;
pub mod task_manager;

// Re-export core types for convenience
pub use crate::core::*;
