//! # OneWord CLI
//!
//! Command-line client for the subtitle backend: uploads a file, starts a
//! job, follows its progress with the live reconciler, and downloads the
//! SRT when the job completes. Ctrl-C cancels the server-side job too.

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use oneword_backend::client::{
    ApiClient, ClientSession, PollConfig, PollOutcome, PollUpdate, PollingController, StatusSource,
};
use std::io::Write;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "oneword", about = "Generate word-level subtitles from a media file")]
struct Cli {
    /// Backend server URL
    #[arg(long, global = true, default_value = "http://127.0.0.1:8080")]
    server: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Upload a file, transcribe it, and download the subtitles
    Submit {
        /// Media file to transcribe
        input: PathBuf,

        /// Model: tiny, base, small, medium, large, or a supported
        /// fine-tune repository id
        #[arg(long)]
        model: Option<String>,

        /// Language hint (hi, en, ur, es); omit for auto-detect
        #[arg(long)]
        language: Option<String>,

        /// Subtitle mode: oneword, twoword, or phrase
        #[arg(long)]
        mode: Option<String>,

        /// Where to write the SRT (default: next to the input)
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Print the current status of a job
    Status { job_id: Uuid },

    /// Cancel a pending or running job
    Cancel { job_id: Uuid },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "oneword=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let client = ApiClient::new(&cli.server)?;

    match cli.command {
        Command::Submit {
            input,
            model,
            language,
            mode,
            output,
        } => submit(client, input, model, language, mode, output).await,
        Command::Status { job_id } => {
            let snapshot = client
                .fetch(job_id)
                .await
                .map_err(|e| anyhow!("Status query failed: {}", e))?;
            println!(
                "{} {:.1}% {}",
                snapshot.status,
                snapshot.progress,
                snapshot.status_message.unwrap_or_default()
            );
            if let Some(error) = snapshot.error {
                println!("error: {}", error);
            }
            Ok(())
        }
        Command::Cancel { job_id } => {
            let message = client.cancel(job_id).await?;
            println!("{}", message);
            Ok(())
        }
    }
}

async fn submit(
    client: ApiClient,
    input: PathBuf,
    model: Option<String>,
    language: Option<String>,
    mode: Option<String>,
    output: Option<PathBuf>,
) -> Result<()> {
    let mut session = ClientSession::default();

    let uploaded = client.upload(&input).await?;
    println!(
        "Uploaded {} ({} bytes) as {}",
        uploaded.filename, uploaded.size, uploaded.file_id
    );
    session.file_id = Some(uploaded.file_id.clone());

    let job_id = client
        .start(
            &uploaded.file_id,
            model.as_deref(),
            language.as_deref(),
            mode.as_deref(),
        )
        .await?;
    println!("Job {} started", job_id);
    session.job_id = Some(job_id);

    // Ctrl-C aborts the poll loop; the job itself is cancelled below.
    let abort = CancellationToken::new();
    let abort_on_signal = abort.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            abort_on_signal.cancel();
        }
    });

    let controller = PollingController::new(PollConfig::default());
    let outcome = controller
        .run(job_id, &client, &abort, render_update)
        .await;
    println!();

    match outcome {
        PollOutcome::Completed => {
            let dest = output.unwrap_or_else(|| {
                let mode = mode.as_deref().unwrap_or("oneword");
                input.with_extension(format!("{}.srt", mode))
            });
            client.download(job_id, &dest).await?;
            println!("Subtitles saved to {}", dest.display());
            Ok(())
        }
        PollOutcome::Failed => {
            session.reset();
            Err(anyhow!("Processing failed; see the message above"))
        }
        PollOutcome::Cancelled => {
            session.reset();
            Err(anyhow!("Job was cancelled"))
        }
        PollOutcome::ConnectionLost => {
            session.reset();
            Err(anyhow!(
                "Connection lost: the server no longer knows this job. Upload and start again."
            ))
        }
        PollOutcome::ServerUnreachable => {
            session.reset();
            Err(anyhow!("Server unreachable, giving up"))
        }
        PollOutcome::Aborted => {
            match client.cancel(job_id).await {
                Ok(message) => println!("{}", message),
                Err(e) => eprintln!("Could not cancel job: {}", e),
            }
            session.reset();
            Err(anyhow!("Interrupted"))
        }
    }
}

fn render_update(update: PollUpdate) {
    match update {
        PollUpdate::Progress {
            displayed,
            status,
            message,
        } => {
            print!(
                "\r[{:>5.1}%] {:<10} {:<60}",
                displayed,
                status,
                message.unwrap_or_default()
            );
            let _ = std::io::stdout().flush();
        }
        PollUpdate::Completed => print!("\rDone.{:<80}", ""),
        PollUpdate::Failed { error } => print!("\rFailed: {}", error),
        PollUpdate::Cancelled => print!("\rCancelled."),
        PollUpdate::ConnectionLost => print!("\rConnection lost."),
        PollUpdate::ServerUnreachable => print!("\rServer unreachable."),
    }
}
