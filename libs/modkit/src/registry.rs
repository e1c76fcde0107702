use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use thiserror::Error;

use crate::context::ModuleCtx;
use crate::contracts::{CheckCtx, Module, PreconditionViolation, Registrar};

/// The ordered runtime registry.
///
/// Order is given by the host program and never changed: every phase visits
/// modules front to back (stop runs back to front).
pub struct ModuleRegistry {
    modules: Vec<Arc<dyn Module>>,
}

impl std::fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleRegistry")
            .field("modules", &self.names())
            .finish()
    }
}

impl ModuleRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Validate and wrap an explicit module list.
    pub fn new(modules: Vec<Arc<dyn Module>>) -> Result<Self, RegistryError> {
        let mut b = RegistryBuilder::default();
        for m in modules {
            b.register(m);
        }
        b.build()
    }

    pub fn modules(&self) -> &[Arc<dyn Module>] {
        &self.modules
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.modules.iter().map(|m| m.name()).collect()
    }

    pub fn get_module(&self, name: &str) -> Option<Arc<dyn Module>> {
        self.modules.iter().find(|m| m.name() == name).cloned()
    }

    // ---- Ordered phases: register → must_check → initialize; stop at shutdown ----

    pub fn run_register_phase(&self, reg: &mut Registrar) {
        for m in &self.modules {
            tracing::trace!(module = m.name(), "register");
            m.register(reg);
        }
    }

    pub fn run_check_phase(&self, ctx: &CheckCtx<'_>) -> Result<(), RegistryError> {
        for m in &self.modules {
            m.must_check(ctx)?;
        }
        Ok(())
    }

    /// Initialize every module in order; the first failure aborts the phase.
    pub async fn run_init_phase(&self, base_ctx: &ModuleCtx) -> Result<(), RegistryError> {
        for m in &self.modules {
            let ctx = base_ctx.clone().for_module(m.name());
            m.initialize(&ctx)
                .await
                .map_err(|source| RegistryError::Init {
                    module: m.name(),
                    source,
                })?;
            tracing::debug!(module = m.name(), "module initialized");
        }
        Ok(())
    }

    pub async fn run_stop_phase(&self, cancel: CancellationToken) {
        for m in self.modules.iter().rev() {
            if let Err(err) = m.stop(cancel.clone()).await {
                tracing::warn!(module = m.name(), error = %err, "Failed to stop module");
            }
        }
    }
}

/// Collects modules in registration order; checks are deferred to `build`.
#[derive(Default)]
pub struct RegistryBuilder {
    modules: Vec<Arc<dyn Module>>,
    errors: Vec<String>,
}

impl RegistryBuilder {
    pub fn register(&mut self, m: Arc<dyn Module>) -> &mut Self {
        let name = m.name();
        if self.modules.iter().any(|e| e.name() == name) {
            self.errors
                .push(format!("Module '{name}' is already registered"));
            return self;
        }
        self.modules.push(m);
        self
    }

    pub fn with(mut self, m: Arc<dyn Module>) -> Self {
        self.register(m);
        self
    }

    /// Finalize; every declared dependency must be registered and come earlier.
    pub fn build(self) -> Result<ModuleRegistry, RegistryError> {
        if !self.errors.is_empty() {
            return Err(RegistryError::InvalidRegistryConfiguration {
                errors: self.errors,
            });
        }

        let all: HashSet<&'static str> = self.modules.iter().map(|m| m.name()).collect();
        let mut seen: HashSet<&'static str> = HashSet::with_capacity(all.len());
        for m in &self.modules {
            for &d in m.deps() {
                if !all.contains(d) {
                    return Err(RegistryError::UnknownDependency {
                        module: m.name().to_string(),
                        depends_on: d.to_string(),
                    });
                }
                if !seen.contains(d) {
                    return Err(RegistryError::OrderViolation {
                        module: m.name().to_string(),
                        depends_on: d.to_string(),
                    });
                }
            }
            seen.insert(m.name());
        }

        tracing::debug!(
            modules = ?self.modules.iter().map(|m| m.name()).collect::<Vec<_>>(),
            "Module order validated"
        );

        Ok(ModuleRegistry {
            modules: self.modules,
        })
    }
}

/// Structured errors for the module registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    // Phase errors with module context
    #[error(transparent)]
    Precondition(#[from] PreconditionViolation),
    #[error("initialization failed for module '{module}'")]
    Init {
        module: &'static str,
        #[source]
        source: anyhow::Error,
    },

    // Build errors
    #[error("module '{module}' depends on unknown '{depends_on}'")]
    UnknownDependency { module: String, depends_on: String },
    #[error("module '{module}' must be registered after its dependency '{depends_on}'")]
    OrderViolation { module: String, depends_on: String },
    #[error("invalid registry configuration:\n{errors:#?}")]
    InvalidRegistryConfiguration { errors: Vec<String> },
}
