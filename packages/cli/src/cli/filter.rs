use clap::{Args, ValueEnum, ValueHint};
use filtermate_engine::{CombineOperator, ProviderType};
use std::path::PathBuf;

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Args)]
pub struct BuildArgs {
    /// Engine configuration as a JSON file; missing keys keep their defaults.
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub config: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    /// Filter request JSON file. Use '-' to read from stdin.
    pub request: String,
}

#[derive(Debug, Args)]
pub struct CombineArgs {
    /// Subset string currently applied to the layer.
    #[arg(long)]
    pub old: Option<String>,

    /// AND, OR, AND NOT or REPLACE. Omitted means REPLACE.
    #[arg(long, value_parser = parse_operator)]
    pub operator: Option<CombineOperator>,

    #[arg(long, value_parser = parse_provider, default_value = "postgres")]
    pub provider: ProviderType,

    /// Skip the duplicate IN-clause optimizer.
    #[arg(long)]
    pub no_optimize: bool,

    /// Freshly built expression.
    pub expression: String,
}

#[derive(Debug, Args)]
pub struct SanitizeArgs {
    #[arg(required = true)]
    pub identifiers: Vec<String>,
}

fn parse_operator(value: &str) -> Result<CombineOperator, String> {
    value.parse().map_err(|err| format!("{err}"))
}

fn parse_provider(value: &str) -> Result<ProviderType, String> {
    ProviderType::from_provider_key(value).ok_or_else(|| format!("unknown provider `{value}`"))
}
