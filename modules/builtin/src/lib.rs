//! Modules shipped with the scaffold.
//!
//! Order matters when they are listed in a registry: standalone modules
//! (version, help) first, then `config`, then everything that reads the
//! loaded configuration.

pub mod config;
pub mod help;
pub mod logger;
pub mod maxprocs;
pub mod mysql;
pub mod version;
pub mod watch;

pub use config::ConfigModule;
pub use help::HelpModule;
pub use logger::LoggerModule;
pub use maxprocs::{CpuBudget, ResourceTuner};
pub use mysql::{DatabaseConnector, PasswordPrompt};
pub use version::VersionModule;
pub use watch::WatchModule;
