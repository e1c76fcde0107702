//! Process runtime services shared by every module: the layered configuration
//! store with change notification, and the swappable logging sink.

pub mod config;
pub mod logging;

pub use config::{ConfigChanges, ConfigError, ConfigStore, ConfigTree, LoadSpec};
pub use logging::{
    Fatal, LogConfig, LogConfigError, LogFormat, LogLevel, LogSink, LoggerOptions,
    StacktracePolicy,
};
