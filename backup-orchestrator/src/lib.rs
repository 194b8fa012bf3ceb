//! Backup Orchestrator Library
//!
//! Drives borg, restic and rsync on remote hosts over SSH (or on the local
//! machine), installs those tools, and streams every run's log trail to
//! subscribed observers.

pub mod builders;
pub mod config;
pub mod credentials;
pub mod error;
pub mod executor;
pub mod models;
pub mod services;
pub mod utils;
pub mod ws;

// Re-export commonly used types
pub use config::OrchestratorConfig;
pub use error::{OrchestratorError, Result};
pub use services::Operations;
pub use ws::LogBroadcaster;
