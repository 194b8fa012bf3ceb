//! Utility modules shared across the orchestrator.

pub mod logger;
pub mod mask;
pub mod shell;

pub use mask::SecretMasker;
