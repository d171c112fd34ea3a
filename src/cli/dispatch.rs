use super::check_config::cmd_check_config;
use super::clock::cmd_clock;
use super::env::CliArgs;
use super::next_trigger::cmd_next_trigger;
use super::run::cmd_run;
use crate::cli::commands::Commands;
use crate::cli::context::CliContext;
use anyhow::Result;

pub async fn dispatch(cli: &CliArgs, ctx: &CliContext) -> Result<()> {
    match cli.command.clone() {
        Commands::Run(args) => cmd_run(args, ctx).await,
        Commands::Clock(args) => cmd_clock(args, ctx).await,
        Commands::NextTrigger(args) => cmd_next_trigger(args, ctx),
        Commands::CheckConfig => cmd_check_config(ctx),
    }
}
