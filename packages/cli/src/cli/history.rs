use clap::{Args, Subcommand, ValueEnum};

#[derive(Debug, Args)]
pub struct HistoryCommand {
    #[command(subcommand)]
    pub command: HistorySubcommand,
}

#[derive(Debug, Subcommand)]
pub enum HistorySubcommand {
    /// List a layer's recorded subset strings, oldest first.
    List(HistoryListArgs),
    /// Drop the latest entry and print the subset it restores.
    Unfilter(HistoryLayerArgs),
    /// Delete every entry of a layer.
    Reset(HistoryLayerArgs),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum HistoryOutputFormat {
    Table,
    Json,
}

#[derive(Debug, Args)]
pub struct HistoryListArgs {
    #[arg(long, value_enum, default_value_t = HistoryOutputFormat::Table)]
    pub format: HistoryOutputFormat,

    pub layer_id: String,
}

#[derive(Debug, Args)]
pub struct HistoryLayerArgs {
    pub layer_id: String,
}
