//! Command dispatch: bridges CLI args -> client session -> output formatting.

pub mod action;
pub mod call;
pub mod config_cmd;
pub mod info;
pub mod log;
pub mod state;
pub mod util;
pub mod watch;

use eva_core::ClientConfig;

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

/// Dispatch a server-bound command to the appropriate handler.
pub async fn dispatch(
    cmd: Command,
    config: ClientConfig,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    match cmd {
        Command::State(args) => state::handle(config, args, global).await,
        Command::Watch(args) => watch::handle(config, args, global).await,
        Command::Call(args) => call::handle(config, args, global).await,
        Command::Log(args) => log::handle(config, args, global).await,
        Command::Action(args) => action::handle(config, args, global).await,
        Command::Info => info::handle(config, global).await,
        // Config and Completions never reach a server
        Command::Config(args) => config_cmd::handle(args, global),
        Command::Completions(_) => Ok(()),
    }
}
