//! Flo CLI Application
//!
//! Command-line host for the flo-runner library. It adds:
//! - Flow definitions loaded from TOML
//! - Declarative actions and conditions
//! - Text and JSON reports

use anyhow::{Context, Result};
use clap::Parser;
use flo_runner::{CallbackRunner, CollectingReporter, Environment, Value};
use std::path::PathBuf;
use std::process::ExitCode;

mod callbacks;
mod config;
mod report;

/// Flo - Run flow definitions on the cooperative callback runner
#[derive(Parser, Debug)]
#[command(name = "flo")]
#[command(about = "Run flow definitions on a cooperative callback runner", long_about = None)]
#[command(version)]
struct Args {
    /// Path to the flow definition (TOML)
    #[arg(value_name = "FLOW")]
    flow: PathBuf,

    /// Override the iteration ceiling from the flow file
    #[arg(long, value_name = "COUNT")]
    max_iterations: Option<usize>,

    /// Set an initial variable (can be repeated); VALUE is read as JSON, else as a string
    #[arg(long = "var", value_name = "NAME=VALUE", value_parser = parse_var)]
    vars: Vec<(String, Value)>,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,

    /// Log every callback invocation at trace level
    #[arg(long)]
    trace_callbacks: bool,

    /// Verbosity level (can be repeated: -v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long)]
    quiet: bool,
}

/// Exit status when a run overflows its ceiling
const EXIT_OVERFLOWED: u8 = 2;

fn main() -> Result<ExitCode> {
    // Parse command line arguments
    let args = Args::parse();

    // Initialize logging
    init_logging(args.verbose, args.quiet);

    log::info!("Flo CLI v{}", env!("CARGO_PKG_VERSION"));
    log::info!("Using runner library v{}", flo_runner::VERSION);

    let drained = run_flow(&args)?;
    Ok(if drained {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_OVERFLOWED)
    })
}

/// Load, compile and run the flow, then print the report
fn run_flow(args: &Args) -> Result<bool> {
    log::info!("Loading flow from: {:?}", args.flow);
    let flow_config = config::load_config(&args.flow)?;
    log::debug!("Flow '{}' loaded ({} nodes)", flow_config.name, flow_config.nodes.len());

    let mut runner_config = flow_config.runner.clone();
    if let Some(max_iterations) = args.max_iterations {
        runner_config = runner_config.with_max_iterations(max_iterations);
    }
    if args.trace_callbacks {
        runner_config = runner_config.with_callback_tracing(true);
    }

    let messages = callbacks::MessageLog::new();
    let flow = callbacks::build_graph(&flow_config, &messages)?
        .compile()
        .with_context(|| format!("Failed to compile flow '{}'", flow_config.name))?;
    log::debug!("Compiled functions: {:?}", flow.function_names());

    let mut env = Environment::with_vars(flow_config.vars.clone());
    for (name, value) in &args.vars {
        env.set(name.clone(), value.clone());
    }

    let reporter = CollectingReporter::new();
    let runner = CallbackRunner::with_config(runner_config).with_reporter(reporter.clone());
    let run = flow.run(&runner, &mut env);

    // The runner already logged any overflow, the report lists it
    let errors = reporter.messages();

    let message_list = messages.messages();
    let report = report::FlowReport::new(&flow_config.name, &run, &env)
        .with_description(flow_config.description.as_deref())
        .with_messages(&message_list)
        .with_errors(&errors);

    if args.json {
        let value = report.render_json().context("Failed to serialize report")?;
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else if !args.quiet {
        print!("{}", report.render_text());
    }

    Ok(run.is_drained())
}

/// Parse a `NAME=VALUE` pair for `--var`
fn parse_var(s: &str) -> std::result::Result<(String, Value), String> {
    let (name, raw) = s
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{}'", s))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("missing variable name in '{}'", s));
    }
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((name.to_string(), value))
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: u8, quiet: bool) {
    use env_logger::Builder;
    use log::LevelFilter;
    use std::io::Write;

    let level = if quiet {
        LevelFilter::Error
    } else {
        match verbose {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            2 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };

    Builder::new()
        .filter_level(level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {}] {}",
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
}
