use std::{
    io,
    path::{Path, PathBuf},
    process::ExitCode,
    sync::Arc,
};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use client_core::{HttpStatusEndpoint, JobController, JobEvent};
use shared::domain::{Job, JobPhase};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::broadcast::{self, error::RecvError},
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod document;
mod render;

use config::{load_settings, Settings};
use document::load_document;
use render::ProgressRenderer;

#[derive(Parser, Debug)]
#[command(
    name = "paper-review",
    version,
    about = "Submit a paper for review and follow the job until it finishes"
)]
struct Args {
    /// TOML settings file (defaults to ./review.toml when present).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[arg(long, global = true)]
    server_url: Option<String>,
    /// Talk to the `/api/upload` + `/api/review/{id}` backend.
    #[arg(long, global = true)]
    legacy_routes: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload a PDF and wait for its review.
    Submit {
        file: PathBuf,
        /// Write the review JSON here instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,
        /// Never ask to retry after a failure.
        #[arg(long)]
        no_prompt: bool,
    },
    /// Check that the review service answers.
    Health,
}

type Renderer = ProgressRenderer<io::Stderr>;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    let mut settings = load_settings(args.config.as_deref())?;
    if let Some(server_url) = args.server_url {
        settings.server_url = server_url;
    }
    if args.legacy_routes {
        settings.legacy_routes = true;
    }

    let endpoint = HttpStatusEndpoint::new(
        &settings.server_url,
        settings.routes(),
        settings.request_timeout(),
    )?;
    info!(server_url = %endpoint.base_url(), legacy_routes = settings.legacy_routes, "review service configured");

    match args.command {
        Command::Health => {
            let body = endpoint
                .health()
                .await
                .context("review service health check failed")?;
            println!("{body}");
            Ok(ExitCode::SUCCESS)
        }
        Command::Submit {
            file,
            output,
            no_prompt,
        } => run_submit(endpoint, &settings, &file, output.as_deref(), !no_prompt).await,
    }
}

async fn run_submit(
    endpoint: HttpStatusEndpoint,
    settings: &Settings,
    file: &Path,
    output: Option<&Path>,
    interactive: bool,
) -> Result<ExitCode> {
    let document = load_document(file, settings.max_document_bytes).await?;
    let controller = JobController::new(Arc::new(endpoint), settings.controller_config());
    let mut renderer = ProgressRenderer::new(io::stderr());

    loop {
        let mut events = controller.subscribe();
        controller.submit(document.clone()).await?;
        let mut job = follow_job(&controller, &mut events, &mut renderer).await?;

        match job.phase {
            JobPhase::Completed => {
                if job.result.is_none()
                    && interactive
                    && ask(&mut renderer, "Retry downloading the report?").await?
                {
                    controller.retry_result_fetch().await;
                    job = controller.state().await;
                }
                write_result(&job, output)?;
                return Ok(ExitCode::SUCCESS);
            }
            JobPhase::Failed => {
                if interactive && ask(&mut renderer, "Retry the review?").await? {
                    controller.reset().await;
                    continue;
                }
                return Ok(ExitCode::FAILURE);
            }
            phase => bail!("job stopped in unexpected phase {phase}"),
        }
    }
}

/// Renders events until the job settles; returns the settled snapshot.
async fn follow_job(
    controller: &Arc<JobController>,
    events: &mut broadcast::Receiver<JobEvent>,
    renderer: &mut Renderer,
) -> Result<Job> {
    loop {
        let event = tokio::select! {
            event = events.recv() => event,
            _ = tokio::signal::ctrl_c() => {
                controller.reset().await;
                bail!("interrupted; job abandoned");
            }
        };

        match event {
            Ok(event) => {
                renderer.render(&event)?;
                match event {
                    JobEvent::StateChanged(job) if settled(&job) => return Ok(job),
                    JobEvent::Warning(_) => {
                        let job = controller.state().await;
                        if job.phase == JobPhase::Completed {
                            return Ok(job);
                        }
                    }
                    JobEvent::StateChanged(_) => {}
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "renderer fell behind job events");
                let job = controller.state().await;
                if settled_after_lag(&job) {
                    return Ok(job);
                }
            }
            Err(RecvError::Closed) => return Ok(controller.state().await),
        }
    }
}

/// Failed jobs settle at once; completed ones once the report fetch resolved.
fn settled(job: &Job) -> bool {
    match job.phase {
        JobPhase::Failed => true,
        JobPhase::Completed => job.result.is_some(),
        _ => false,
    }
}

/// Skipped events may include the fetch warning, so any terminal phase counts.
fn settled_after_lag(job: &Job) -> bool {
    job.phase.is_terminal()
}

async fn ask(renderer: &mut Renderer, question: &str) -> Result<bool> {
    renderer.prompt(question)?;
    let mut line = String::new();
    let read = BufReader::new(tokio::io::stdin())
        .read_line(&mut line)
        .await
        .context("failed to read answer from stdin")?;
    if read == 0 {
        return Ok(false);
    }
    Ok(matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}

fn write_result(job: &Job, output: Option<&Path>) -> Result<()> {
    let Some(result) = &job.result else {
        let job_id = job
            .job_id
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default();
        eprintln!("review finished but the report is unavailable; job id {job_id}");
        return Ok(());
    };

    let rendered = serde_json::to_string_pretty(result)?;
    match output {
        Some(path) => {
            std::fs::write(path, rendered + "\n")
                .with_context(|| format!("failed to write report to '{}'", path.display()))?;
            info!(path = %path.display(), "report written");
        }
        None => println!("{rendered}"),
    }
    Ok(())
}
