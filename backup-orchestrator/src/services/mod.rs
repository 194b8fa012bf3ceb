pub mod deployer;
pub mod mount;
pub mod operations;

pub use operations::Operations;
