use super::config::cmd_config;
use super::env::CliArgs;
use super::info::cmd_info;
use super::learn::{cmd_learn, cmd_rank};
use super::templates::{cmd_delete, cmd_list, cmd_show};
use crate::cli::commands::Commands;
use crate::cli::context::CliContext;
use anyhow::Result;

pub async fn dispatch(cli: &CliArgs, ctx: &CliContext) -> Result<()> {
    match cli.command.clone() {
        Commands::Rank(args) => cmd_rank(args, ctx).await,
        Commands::Learn(args) => cmd_learn(args, ctx).await,
        Commands::List => cmd_list(ctx).await,
        Commands::Show(args) => cmd_show(args, ctx).await,
        Commands::Delete(args) => cmd_delete(args, ctx).await,
        Commands::Config(args) => cmd_config(args, ctx).await,
        Commands::Info => cmd_info(ctx).await,
    }
}
