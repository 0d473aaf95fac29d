mod cli;
mod config;
mod output;

use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use engine_logging::{engine_error, engine_info};
use spotter_engine::{Orchestrator, RunError, SearchRequest};

use cli::Cli;

fn main() -> ExitCode {
    let cli = Cli::parse();
    engine_logging::initialize(cli.log_level(), cli.log_destination());

    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            engine_error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = config::load(cli.config.as_deref()).context("loading configuration")?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("starting tokio runtime")?;

    let request = SearchRequest {
        start_url: cli.start_url,
        template_path: cli.template,
        target: cli.target,
    };
    engine_info!(
        "searching {} for {} (matching: {})",
        request.start_url,
        request.template_path.display(),
        request.target
    );
    let orchestrator = Orchestrator::new(config.search, config.fetch);

    match runtime.block_on(orchestrator.run(&request)) {
        Ok(summary) => {
            output::emit(&summary).context("writing result")?;
            Ok(ExitCode::SUCCESS)
        }
        Err(RunError::Template(err)) => {
            engine_error!("{err}");
            output::emit(&output::template_error_record(&err)).context("writing result")?;
            Ok(ExitCode::FAILURE)
        }
        Err(err) => Err(err).context("search failed"),
    }
}
