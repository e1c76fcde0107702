mod runner;
mod shutdown;

pub use runner::{boot, invoked_command, BootError, BootOptions, Booted};
pub use shutdown::{wait_for_shutdown, wait_for_shutdown_or};
