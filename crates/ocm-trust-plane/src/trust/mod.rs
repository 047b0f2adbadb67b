//! Trust groups: configuration and membership

pub mod config;
pub mod manager;

pub use config::{DirectoryServiceConfig, TrustGroupConfig};
pub use manager::{ManagerSettings, RefreshError, TrustGroupManager};
