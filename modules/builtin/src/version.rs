use async_trait::async_trait;
use modkit::{Module, ModuleCtx, Registrar};

/// Adds `-V/--version` to the root command.
#[derive(Debug, Clone)]
pub struct VersionModule {
    pub package: &'static str,
    pub version: &'static str,
}

impl VersionModule {
    pub fn new(package: &'static str, version: &'static str) -> Self {
        Self { package, version }
    }
}

#[async_trait]
impl Module for VersionModule {
    fn name(&self) -> &'static str {
        "version"
    }

    fn register(&self, reg: &mut Registrar) {
        let short = self.version;
        // clap prefixes the command name itself
        let long = format!("{} ({})", self.version, self.package);
        reg.map_command(|cmd| cmd.version(short).long_version(long));
    }

    async fn initialize(&self, _ctx: &ModuleCtx) -> anyhow::Result<()> {
        Ok(())
    }
}
