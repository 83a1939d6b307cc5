use ats_benchmark::cli::{self, Args, Command};
use ats_benchmark::summary::{self, Comparison};
use ats_benchmark::{BenchResult, Pipeline, logger, problem};
use ats_core::config::Config;
use ats_core::llm::LlmClient;
use ats_core::{RunKind, ToolKind};
use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            // The logger may not be up yet.
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> BenchResult<ExitCode> {
    let Some(config) = cli::initialize(&args)? else {
        return Ok(ExitCode::SUCCESS);
    };
    logger::init(&config.log_filter, &config.output)?;
    let Some(command) = args.command else {
        eprintln!("No command given; see `benchmark --help`");
        return Ok(ExitCode::FAILURE);
    };

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; finishing the records of started tools");
            trigger.cancel();
        }
    });

    match command {
        Command::Summary => Ok(print_summary(&config)),
        Command::CheckLlm => check_llm(&config).await,
        Command::Run { tool } => {
            let problem = Pipeline::analysis_problem(&config);
            benchmark(&config, RunKind::Analysis, tool.tools(), problem, false, &cancel).await
        }
        Command::Repair { tool, parallel, .. } => {
            let tools = match tool {
                Some(selection) => selection.tools(),
                None => config.repair.tools.clone(),
            };
            let problem = problem::resolve(
                config.problem.as_deref(),
                &config.target,
                &config.context.extensions,
                &config.context.skip_dirs,
                &config.output,
            );
            info!("Problem: {problem}");
            let parallel = parallel || config.repair.parallel;
            benchmark(&config, RunKind::Repair, tools, problem, parallel, &cancel).await
        }
    }
}

async fn benchmark(
    config: &Config,
    kind: RunKind,
    tools: Vec<ToolKind>,
    problem: String,
    parallel: bool,
    cancel: &CancellationToken,
) -> BenchResult<ExitCode> {
    config.require_api_key()?;
    if !config.target.is_dir() {
        return Err(format!("target {} is not a directory", config.target.display()).into());
    }
    info!("Target: {}", config.target.display());
    info!("Output: {}", config.output.display());
    info!("Model: {}", config.llm.model);

    let client = LlmClient::from_config(&config.llm)?;
    let pipeline = Arc::new(Pipeline::new(config, client, problem));
    let summary = pipeline.run_all(kind, &tools, parallel, cancel).await;
    println!("{}", summary.render());
    Ok(match summary.any_failed() {
        true => ExitCode::FAILURE,
        false => ExitCode::SUCCESS,
    })
}

async fn check_llm(config: &Config) -> BenchResult<ExitCode> {
    config.require_api_key()?;
    let client = LlmClient::from_config(&config.llm)?;
    println!("Checking {} at {}", client.model(), config.llm.address);
    match client.check_connection().await {
        Ok(result) => {
            println!(
                "OK: {:?} ({} tokens in, {} out, {:.2}s)",
                result.raw_response_text.trim(),
                result.tokens_in,
                result.tokens_out,
                result.latency_seconds
            );
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            error!("{e}");
            Ok(ExitCode::FAILURE)
        }
    }
}

fn print_summary(config: &Config) -> ExitCode {
    let comparison = Comparison::load(&config.output);
    if comparison.is_empty() {
        println!(
            "No results in {}. Run `benchmark run` or `benchmark repair` first.",
            config.output.display()
        );
        return ExitCode::FAILURE;
    }
    println!("{}", summary::analysis_table(&comparison.results));
    let repairs = summary::repair_table(&comparison.repairs);
    if !repairs.is_empty() {
        println!("{repairs}");
    }
    match comparison.save(&config.output) {
        Ok(path) => println!("Summary saved to {}", path.display()),
        Err(e) => error!("{e}"),
    }
    ExitCode::SUCCESS
}
