//! # ModKit - ordered module lifecycle
//!
//! A host program lists its modules explicitly, in dependency order, and
//! hands them to [`runtime::boot`]:
//!
//! ```rust,ignore
//! let registry = ModuleRegistry::builder()
//!     .with(Arc::new(ConfigModule::default()))
//!     .with(Arc::new(LoggerModule::default()))
//!     .build()?;
//! let booted = modkit::boot(registry, BootOptions::new(cli(), "APP")).await?;
//! ```
//!
//! Every module goes through `register` → `must_check` → `initialize`, each
//! phase completing for all modules before the next starts. A [`Watcher`]
//! can re-run `initialize` on selected modules when the config file changes.

pub use anyhow::Result;
pub use async_trait::async_trait;
pub use clap;

pub mod client_hub;
pub mod context;
pub mod contracts;
pub mod lifecycle;
pub mod registry;
pub mod runtime;
pub mod watcher;

pub use client_hub::ClientHub;
pub use context::{ModuleCtx, ModuleCtxBuilder};
pub use contracts::{CheckCtx, FlagBinding, Module, PreconditionViolation, Registrar};
pub use lifecycle::{Lifecycle, Runnable, Status, StopReason};
pub use registry::{ModuleRegistry, RegistryBuilder, RegistryError};
pub use self::runtime::{boot, BootError, BootOptions, Booted};
pub use watcher::Watcher;
