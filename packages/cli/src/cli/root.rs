use super::filter::{BuildArgs, CombineArgs, SanitizeArgs};
use super::history::HistoryCommand;
use clap::{Parser, Subcommand, ValueHint};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "filtermate")]
#[command(about = "FilterMate spatial filter command line interface")]
pub struct Cli {
    /// Path to the SQLite history database (defaults to ./filtermate.sqlite).
    #[arg(long, global = true, value_hint = ValueHint::FilePath)]
    pub db: Option<PathBuf>,

    /// Project uuid that scopes history entries.
    #[arg(long, global = true, default_value = "default")]
    pub project: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Build a filter expression from a JSON filter request.
    Build(BuildArgs),
    /// Combine a new expression with an existing subset string.
    Combine(CombineArgs),
    /// Sanitize identifiers for use in SQL names.
    Sanitize(SanitizeArgs),
    /// Inspect or rewind a layer's subset history.
    History(HistoryCommand),
}

#[cfg(test)]
mod tests {
    use super::{Cli, Command};
    use crate::cli::history::HistorySubcommand;
    use clap::{CommandFactory, Parser};
    use filtermate_engine::{CombineOperator, ProviderType};

    #[test]
    fn command_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn combine_parses_operator_and_provider() {
        let cli = Cli::try_parse_from([
            "filtermate",
            "combine",
            "--old",
            "\"id\" = 1",
            "--operator",
            "and not",
            "--provider",
            "ogr",
            "\"id\" = 2",
        ])
        .expect("arguments should parse");

        let Command::Combine(args) = cli.command else {
            panic!("expected combine command");
        };
        assert_eq!(args.operator, Some(CombineOperator::AndNot));
        assert_eq!(args.provider, ProviderType::Ogr);
        assert_eq!(args.old.as_deref(), Some("\"id\" = 1"));
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let result = Cli::try_parse_from(["filtermate", "combine", "--provider", "mssql", "x"]);
        assert!(result.is_err());
    }

    #[test]
    fn history_takes_global_db_and_project() {
        let cli = Cli::try_parse_from([
            "filtermate",
            "history",
            "unfilter",
            "roads_layer",
            "--db",
            "/tmp/h.sqlite",
            "--project",
            "p-1",
        ])
        .expect("arguments should parse");

        assert_eq!(cli.project, "p-1");
        assert_eq!(
            cli.db.as_deref(),
            Some(std::path::Path::new("/tmp/h.sqlite"))
        );
        let Command::History(history) = cli.command else {
            panic!("expected history command");
        };
        assert!(matches!(history.command, HistorySubcommand::Unfilter(args) if args.layer_id == "roads_layer"));
    }
}
