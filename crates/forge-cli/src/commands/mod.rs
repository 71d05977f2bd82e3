//! Command implementations.

mod bootstrap;
mod init_config;
mod status;

pub use bootstrap::BootstrapCommand;
pub use init_config::InitConfigCommand;
pub use status::StatusCommand;
