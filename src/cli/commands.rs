use clap::Subcommand;

use super::config::ConfigArgs;
use super::learn::{LearnArgs, RankArgs};
use super::templates::NameArgs;

#[derive(Subcommand, Clone)]
pub enum Commands {
    /// Rank the calls of a captured trace against a task
    Rank(RankArgs),

    /// Learn a template from a trace and a chooser decision file
    Learn(LearnArgs),

    /// List stored templates
    List,

    /// Show one stored template
    Show(NameArgs),

    /// Delete a stored template
    Delete(NameArgs),

    /// Inspect livecall configuration
    Config(ConfigArgs),

    /// Show build and store information
    Info,
}
