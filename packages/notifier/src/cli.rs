//! Command line interface.

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "notifier")]
#[command(version, about = "Dispatches transfer lifecycle events to FSP callbacks")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start service
    #[command(visible_alias = "c")]
    Connect(ConnectArgs),
}

#[derive(Debug, Clone, Args)]
pub struct ConnectArgs {
    /// Messages type to consume
    #[arg(long = "type", value_name = "name", default_value = "notification")]
    pub message_type: String,

    /// Message action to consume
    #[arg(long, value_name = "name", default_value = "event")]
    pub action: String,

    /// Topic to produce the answer to
    #[arg(long = "produceToTopic", value_name = "name")]
    pub produce_to_topic: Option<String>,
}
