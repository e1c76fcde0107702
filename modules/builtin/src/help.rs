use async_trait::async_trait;
use clap::{Arg, ArgAction};
use modkit::{Module, ModuleCtx, Registrar};

/// Replaces clap's help flag with a global `-h/--help`.
#[derive(Debug, Clone, Copy, Default)]
pub struct HelpModule {
    /// Keep only `--help`; frees `-h` for other flags.
    pub hidden_short_flag: bool,
    /// Drop the `help` subcommand.
    pub hidden_help_command: bool,
}

#[async_trait]
impl Module for HelpModule {
    fn name(&self) -> &'static str {
        "help"
    }

    fn register(&self, reg: &mut Registrar) {
        let hide_subcommand = self.hidden_help_command;
        reg.map_command(|cmd| {
            cmd.disable_help_flag(true)
                .disable_help_subcommand(hide_subcommand)
        });

        let mut flag = Arg::new("help")
            .long("help")
            .action(ArgAction::Help)
            .help("help message");
        if !self.hidden_short_flag {
            flag = flag.short('h');
        }
        reg.arg(flag);
    }

    async fn initialize(&self, _ctx: &ModuleCtx) -> anyhow::Result<()> {
        Ok(())
    }
}
