mod cli;
mod ui;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Command};

use jobrelay::accessor::Accessor;
use jobrelay::api::{ApiError, StatusResponse, SubmitResponse};
use jobrelay::config::{RelayConfig, Settings};
use jobrelay::context::FileContext;
use jobrelay::dispatcher::Dispatcher;
use jobrelay::error::AccessError;
use jobrelay::worker::{CsvSum, WorkerPool};
use jobrelay::{intake, logging, shutdown};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let mut config = RelayConfig::load(cli.config.as_deref())?;
    if let Command::Worker { workers: Some(n) } = cli.command {
        anyhow::ensure!(n > 0, "--workers must be at least 1");
        config.workers = n;
    }
    let settings = config.settings();
    let ctx = FileContext::open(settings.clone())
        .await
        .context("failed to open the job store and queue")?;

    match cli.command {
        Command::Submit { file } => submit(&ctx, &file).await,
        Command::Status { id } => status(&ctx, &id).await,
        Command::Result { id, output } => result(&ctx, &id, output.as_deref()).await,
        Command::Wait { id } => wait(&ctx, &id).await,
        Command::Worker { .. } => worker(ctx, &settings).await,
    }
}

async fn submit(ctx: &Arc<FileContext>, file: &Path) -> Result<()> {
    let stored = intake::accept(file, &ctx.settings.input_dir).await?;
    let job_id = Dispatcher::new(Arc::clone(ctx)).submit(&stored).await?;
    ui::print_json(&SubmitResponse::accepted(&job_id, &ctx.settings.public_base_url))
}

async fn status(ctx: &Arc<FileContext>, id: &str) -> Result<()> {
    let report = Accessor::new(Arc::clone(ctx))
        .get_status(id)
        .await
        .map_err(access_failure)?;
    ui::print_json(&StatusResponse::from_report(&report, &ctx.settings.public_base_url))
}

async fn result(ctx: &Arc<FileContext>, id: &str, output: Option<&Path>) -> Result<()> {
    let mut artifact = Accessor::new(Arc::clone(ctx))
        .get_result(id)
        .await
        .map_err(access_failure)?;

    match output {
        Some(path) => {
            let mut out = tokio::fs::File::create(path)
                .await
                .with_context(|| format!("failed to create {}", path.display()))?;
            let copied = tokio::io::copy(&mut artifact.file, &mut out).await?;
            eprintln!("wrote {copied} bytes to {}", path.display());
        }
        None => {
            let mut stdout = tokio::io::stdout();
            tokio::io::copy(&mut artifact.file, &mut stdout).await?;
        }
    }
    Ok(())
}

async fn wait(ctx: &Arc<FileContext>, id: &str) -> Result<()> {
    let accessor = Accessor::new(Arc::clone(ctx));
    let progress = ui::JobProgress::start(id);
    loop {
        let report = accessor.get_status(id).await.map_err(access_failure)?;
        let status = StatusResponse::from_report(&report, &ctx.settings.public_base_url);
        if report.state.is_terminal() {
            progress.complete(&status);
            return Ok(());
        }
        progress.update(&status);
        tokio::time::sleep(ctx.settings.poll_interval).await;
    }
}

async fn worker(ctx: Arc<FileContext>, settings: &Settings) -> Result<()> {
    let requeued = ctx.broker.requeue_claimed().await?;
    if requeued > 0 {
        ui::warn(&format!("requeued {requeued} unacknowledged deliveries from an earlier run"));
    }

    let shutdown = shutdown::install_shutdown_handler();
    let pool = WorkerPool::new(ctx, CsvSum::from_settings(settings));
    eprintln!("jobrelay worker running with {} slots, Ctrl-C to stop", pool.slots());
    pool.run(shutdown).await?;
    Ok(())
}

/// Print the client-facing error body, then fail the command.
fn access_failure(err: AccessError) -> anyhow::Error {
    let api = ApiError::from(&err);
    if let Ok(body) = serde_json::to_string_pretty(&api.body) {
        println!("{body}");
    }
    anyhow::Error::new(err).context(format!("request failed with status {}", api.status))
}
