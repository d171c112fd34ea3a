pub mod app;
pub mod check_config;
pub mod clock;
pub mod commands;
pub mod context;
pub mod dispatch;
pub mod env;
pub mod next_trigger;
pub mod output;
pub mod run;
pub mod runtime;

pub use check_config::cmd_check_config;
pub use clock::{cmd_clock, ClockArgs};
pub use next_trigger::{cmd_next_trigger, NextTriggerArgs};
pub use run::{cmd_run, RunArgs};
