//! Binary orchestration: arguments, config, handlers, event source, summary.
use clap::{CommandFactory, FromArgMatches};
use tokio::io::{AsyncWriteExt, BufReader};
use tracing::warn;

use crate::app::{self, Pipeline, StreamStats};
use crate::args::{AggregatorArgs, Command, OutputFormat};
use crate::config::{RunSettings, load_config, resolve_settings};
use crate::error::AppResult;
use crate::logger::init_logging;

/// Runs the `netagg` command line.
///
/// # Errors
///
/// Returns an error when arguments or configuration are invalid, the event
/// source cannot be read, or the summary cannot be produced.
pub fn run() -> AppResult<()> {
    let matches = AggregatorArgs::command().get_matches();
    let args = AggregatorArgs::from_arg_matches(&matches)?;

    init_logging(args.verbose);

    let config = load_config(args.config.as_deref())?;
    let settings = resolve_settings(&args, config.as_ref())?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(run_async(args.command, &settings))
}

async fn run_async(command: Command, settings: &RunSettings) -> AppResult<()> {
    let mut pipeline = Pipeline::start(settings)?;
    let stats = match command {
        Command::Replay(replay) => {
            app::replay_file(&replay.path, &pipeline, replay.heartbeat).await?
        }
        Command::Live(live) => {
            let stdin = BufReader::new(tokio::io::stdin());
            app::run_live(stdin, &pipeline, live.heartbeat, shutdown_signal()).await?
        }
    };
    pipeline.stop();

    let report = render(&pipeline, settings, &stats)?;
    let mut stdout = tokio::io::stdout();
    stdout.write_all(report.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await?;
    Ok(())
}

fn render(pipeline: &Pipeline, settings: &RunSettings, stats: &StreamStats) -> AppResult<String> {
    let summaries = pipeline.summaries(&settings.query)?;
    match settings.output_format {
        OutputFormat::Text => Ok(app::render_text(&summaries, stats)),
        OutputFormat::Json => app::render_json(&summaries, stats),
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "Ctrl-C handler unavailable");
        std::future::pending::<()>().await;
    }
}
