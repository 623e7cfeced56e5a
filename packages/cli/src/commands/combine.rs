use crate::app::AppContext;
use crate::cli::filter::CombineArgs;
use crate::error::CliError;
use crate::output;
use filtermate_engine::SubsetCombiner;

pub fn run(_context: &AppContext, args: CombineArgs) -> Result<(), CliError> {
    if args.expression.trim().is_empty() {
        return Err(CliError::InvalidArgs("expression must not be empty"));
    }
    let combiner = if args.no_optimize {
        SubsetCombiner::default()
    } else {
        SubsetCombiner::with_duplicate_optimizer()
    };
    let combined = combiner.combine(
        &args.expression,
        args.old.as_deref(),
        args.operator,
        args.provider,
    );
    output::print_subset(&combined);
    Ok(())
}
