use async_trait::async_trait;
use clap::{value_parser, Arg, ArgMatches};
use modkit::{CheckCtx, Module, ModuleCtx, PreconditionViolation, Registrar};
use runtime::{ConfigError, LoadSpec};
use std::path::PathBuf;

const CONFIG_ARG: &str = "config";

/// Locates and loads the configuration file; adds `-c/--config <FILE>`.
#[derive(Debug, Clone, Default)]
pub struct ConfigModule {
    pub spec: LoadSpec,
}

impl ConfigModule {
    pub fn new(spec: LoadSpec) -> Self {
        Self { spec }
    }

    /// The discovery spec with `--config` applied.
    fn effective_spec(&self, matches: &ArgMatches) -> LoadSpec {
        let explicit = matches
            .try_get_one::<PathBuf>(CONFIG_ARG)
            .ok()
            .flatten()
            .cloned();
        LoadSpec {
            file: explicit.or_else(|| self.spec.file.clone()),
            ..self.spec.clone()
        }
    }
}

#[async_trait]
impl Module for ConfigModule {
    fn name(&self) -> &'static str {
        "config"
    }

    fn register(&self, reg: &mut Registrar) {
        reg.arg(
            Arg::new(CONFIG_ARG)
                .short('c')
                .long("config")
                .value_name("FILE")
                .value_parser(value_parser!(PathBuf))
                .help("config file path"),
        );
    }

    fn must_check(&self, ctx: &CheckCtx<'_>) -> Result<(), PreconditionViolation> {
        let spec = self.effective_spec(ctx.matches);
        match spec.locate() {
            Ok(_) => Ok(()),
            Err(ConfigError::NotFound { name, searched }) => Err(PreconditionViolation::new(
                self.name(),
                format!(
                    "config file '{name}' not found (searched: {})",
                    searched
                        .iter()
                        .map(|p| p.display().to_string())
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            )),
            Err(e) => Err(PreconditionViolation::new(self.name(), e.to_string())),
        }
    }

    async fn initialize(&self, ctx: &ModuleCtx) -> anyhow::Result<()> {
        let spec = self.effective_spec(ctx.matches());
        ctx.config().load(&spec)?;
        match ctx.config().source() {
            Some(path) => tracing::info!(path = %path.display(), "configuration loaded"),
            None => tracing::info!("no configuration file found; using defaults"),
        }
        Ok(())
    }
}
