mod cli_logger;

use anyhow::Result;
use clap::Parser;
use perfassess::runtime::TracingAllocator;
use perfassess::{
    Assessor, Config, DEFAULT_CONFIG_FILE, DEFAULT_FUNCTION, ModuleRegistry, RawArguments,
    check_arguments, resolve,
};
use tracing_subscriber::EnvFilter;

use std::path::PathBuf;
use std::process::ExitCode;

use cli_logger::CliLogger;

#[global_allocator]
static ALLOCATOR: TracingAllocator = TracingAllocator::new(std::alloc::System);

const LOG_ENV: &str = "PERFASSESS_LOG";

/// Profile one exported function of a dynamic library and chart its time and
/// memory cost.
#[derive(Debug, Parser)]
#[command(name = "perfassess", version, allow_negative_numbers = true)]
struct Cli {
    /// Dynamic library holding the function to assess.
    #[arg(short, long, value_name = "FILE")]
    script: PathBuf,

    /// Existing directory the HTML charts are written to.
    #[arg(short, long, value_name = "DIR")]
    output: PathBuf,

    /// Exported entry point to call.
    #[arg(short, long, default_value = DEFAULT_FUNCTION)]
    function: String,

    /// Keep only the last N path segments of memory labels (0 keeps all).
    #[arg(long = "n-field", alias = "n_field", value_name = "N", default_value_t = 0)]
    n_field: i64,

    /// Package initializer the script belongs to.
    #[arg(long, value_name = "FILE")]
    package: Option<PathBuf>,

    /// Subpackage initializer the script belongs to. Requires --package.
    #[arg(long, value_name = "FILE")]
    subpackage: Option<PathBuf>,

    /// YAML file with the keyword arguments of the call.
    #[arg(short, long, value_name = "FILE")]
    argument: Option<PathBuf>,

    /// Skip allocation tracing.
    #[arg(long)]
    no_memory: bool,

    /// Skip the time chart.
    #[arg(long)]
    no_time: bool,

    /// Chart style configuration.
    #[arg(long, value_name = "FILE", default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[arg(long)]
    json: bool,

    #[arg(long)]
    no_color: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let env_filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let logger = CliLogger::new(cli.json, cli.no_color);
    match run(&cli, &logger) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            logger.print_error(&format!("{err:#}"));
            ExitCode::from(1)
        }
    }
}

fn run(cli: &Cli, logger: &CliLogger) -> Result<()> {
    let config = Config::load_optional(&cli.config);

    let checked = check_arguments(RawArguments {
        script: cli.script.clone(),
        output: cli.output.clone(),
        function: Some(cli.function.clone()),
        n_field: cli.n_field,
        package: cli.package.clone(),
        subpackage: cli.subpackage.clone(),
        argument: cli.argument.clone(),
    })?;
    let output = checked.output.clone();
    let n_field = checked.n_field;
    let target = checked.into_target()?;

    let mut registry = ModuleRegistry::new();
    let resolved = resolve(&target, &mut registry)?;
    tracing::debug!(
        module = %resolved.module,
        loaded = registry.len(),
        "resolved target"
    );

    let mut assessor = Assessor::new(resolved.function, n_field, target.kwargs)
        .with_style(config.chart)
        .with_source(resolved.module, target.function);
    assessor.launch_profiling(!cli.no_memory, !cli.no_time)?;

    for figure in assessor.charts().values() {
        if figure.row_count() == 0 {
            logger.print_warning(&format!("{} has no rows", figure.name));
        }
    }

    let written = assessor.write_html(&output)?;
    logger.print_summary(&assessor.summary(&written))?;
    Ok(())
}
