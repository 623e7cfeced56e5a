use crate::app::AppContext;
use crate::cli::filter::SanitizeArgs;
use crate::error::CliError;
use filtermate_engine::sql::identifiers::sanitize_sql_identifier;

pub fn run(_context: &AppContext, args: SanitizeArgs) -> Result<(), CliError> {
    for identifier in &args.identifiers {
        println!("{}", sanitize_sql_identifier(identifier));
    }
    Ok(())
}
