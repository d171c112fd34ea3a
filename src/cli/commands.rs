use clap::Subcommand;

use super::clock::ClockArgs;
use super::next_trigger::NextTriggerArgs;
use super::run::RunArgs;

#[derive(Subcommand, Clone)]
pub enum Commands {
    /// Run the orchestrator for the configured targets
    Run(RunArgs),

    /// Sample network time once and print the clock status
    Clock(ClockArgs),

    /// Print the upcoming trigger instants
    NextTrigger(NextTriggerArgs),

    /// Validate the configuration file
    CheckConfig,
}
