use crate::app::AppContext;
use crate::cli::filter::{BuildArgs, OutputFormat};
use crate::error::CliError;
use crate::output;
use filtermate_engine::{
    BuildOutcome, EngineServices, FilterBackend, FilterEngineConfig, FilterRequest,
};
use std::io::Read;
use std::path::Path;

pub fn run(_context: &AppContext, args: BuildArgs) -> Result<(), CliError> {
    let request: FilterRequest = serde_json::from_str(&read_input(&args.request)?)
        .map_err(|err| CliError::msg(format!("invalid filter request: {err}")))?;
    let config = match &args.config {
        Some(path) => FilterEngineConfig::from_json_str(&read_file(path)?)?,
        None => FilterEngineConfig::default(),
    };

    let services = EngineServices::new(config);
    let backend = FilterBackend::for_layer(&request.target, &services);
    tracing::debug!(provider = %backend.provider(), "building expression");
    let outcome = pollster::block_on(backend.build_expression(&request))?;

    match args.format {
        OutputFormat::Json => output::print_json(&outcome),
        OutputFormat::Text => match &outcome {
            BuildOutcome::Expression(expression) => println!("{expression}"),
            BuildOutcome::UseOgrFallback(reason) => {
                println!("use OGR fallback: {}", reason.as_str())
            }
        },
    }
    Ok(())
}

fn read_input(source: &str) -> Result<String, CliError> {
    if source == "-" {
        let mut input = String::new();
        std::io::stdin()
            .read_to_string(&mut input)
            .map_err(|source| CliError::io("failed to read request from stdin", source))?;
        if input.trim().is_empty() {
            return Err(CliError::InvalidArgs("stdin request input is empty"));
        }
        return Ok(input);
    }
    read_file(Path::new(source))
}

fn read_file(path: &Path) -> Result<String, CliError> {
    std::fs::read_to_string(path).map_err(|source| CliError::io("failed to read input file", source))
}
