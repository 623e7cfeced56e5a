use crate::app::AppContext;
use crate::cli::history::{
    HistoryCommand, HistoryLayerArgs, HistoryListArgs, HistoryOutputFormat, HistorySubcommand,
};
use crate::db;
use crate::error::CliError;
use crate::output;
use filtermate_engine::SubsetHistory;

pub fn run(context: &AppContext, command: HistoryCommand) -> Result<(), CliError> {
    let path = db::resolve_db_path(context)?;
    let history = db::open_history_at(&path, &context.project)?;
    match command.command {
        HistorySubcommand::List(args) => list(&history, args),
        HistorySubcommand::Unfilter(args) => unfilter(&history, args),
        HistorySubcommand::Reset(args) => reset(&history, args),
    }
}

fn list(history: &SubsetHistory, args: HistoryListArgs) -> Result<(), CliError> {
    let entries = pollster::block_on(history.entries(&args.layer_id))?;
    match args.format {
        HistoryOutputFormat::Json => output::print_json(&entries),
        HistoryOutputFormat::Table => output::print_history_table(&entries),
    }
    Ok(())
}

fn unfilter(history: &SubsetHistory, args: HistoryLayerArgs) -> Result<(), CliError> {
    if pollster::block_on(history.pop_latest(&args.layer_id))?.is_none() {
        println!("nothing to undo for {}", args.layer_id);
        return Ok(());
    }
    let previous = pollster::block_on(history.latest(&args.layer_id))?
        .map(|entry| entry.subset_string)
        .unwrap_or_default();
    output::print_subset(&previous);
    Ok(())
}

fn reset(history: &SubsetHistory, args: HistoryLayerArgs) -> Result<(), CliError> {
    let removed = pollster::block_on(history.delete_for_layer(&args.layer_id))?;
    println!("removed {removed} entries for {}", args.layer_id);
    Ok(())
}
