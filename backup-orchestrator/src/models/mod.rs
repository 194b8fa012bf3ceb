pub mod connection;
pub mod job;
pub mod result;

pub use connection::{ConnectionDescriptor, SystemTarget};
pub use job::{BackupJob, DestinationType, RestoreJob, RetentionPolicy, Tool};
pub use result::{
    BackupResult, DeploymentResult, FileEntry, FileType, Listing, LogEntry, LogType, Snapshot,
};
