use anyhow::{bail, Context};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use quiz_attempt::config::{Config, LogFormat};
use quiz_attempt::models::AnswerUpdate;
use quiz_attempt::services::attempt_runner::AttemptHandle;
use quiz_attempt::utils::time::format_remaining;
use quiz_attempt::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load().context("Failed to load configuration")?;
    init_tracing(config.log_format);

    let assignment_id = match std::env::args().nth(1) {
        Some(id) => id,
        None => bail!("usage: quiz-attempt <assignment-id>"),
    };

    tracing::info!(
        "Starting attempt client for assignment {} (env {})",
        assignment_id,
        std::env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string())
    );

    let app_state = AppState::new(config)
        .await
        .context("Failed to initialize attempt client")?;

    let handle = app_state
        .launch(&assignment_id)
        .await
        .with_context(|| format!("Failed to open assignment {}", assignment_id))?;

    let mut events = handle.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => println!("{}", event.to_json_line()),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("Event printer lagged, skipped {} events", skipped);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    print_status(&handle).await;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match run_command(&handle, line.trim()).await {
            Ok(true) => continue,
            Ok(false) => break,
            Err(e) => eprintln!("error: {:#}", e),
        }
    }

    let final_state = handle.shutdown().await;
    printer.abort();
    if let Some(snapshot) = final_state {
        println!("{}", serde_json::to_string(&snapshot)?);
    }

    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "quiz_attempt=debug".into());
    let registry = tracing_subscriber::registry().with(filter);

    // stdout carries events; logs go to stderr
    match format {
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init(),
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
    }
}

/// Returns `Ok(false)` when the driver should stop reading input.
async fn run_command(handle: &AttemptHandle, line: &str) -> anyhow::Result<bool> {
    let mut parts = line.splitn(3, ' ');
    let command = parts.next().unwrap_or_default();

    match command {
        "" => {}
        "answer" => {
            let (Some(question_id), Some(answer_id)) = (parts.next(), parts.next()) else {
                bail!("usage: answer <question-id> <answer-id>");
            };
            report(handle.update_answer(question_id, AnswerUpdate::select(answer_id)).await);
        }
        "text" => {
            let Some(question_id) = parts.next() else {
                bail!("usage: text <question-id> <text...>");
            };
            let text = parts.next().unwrap_or_default();
            report(handle.update_answer(question_id, AnswerUpdate::text(text)).await);
        }
        "flag" => {
            let Some(question_id) = parts.next() else {
                bail!("usage: flag <question-id>");
            };
            report(handle.toggle_flag(question_id).await);
        }
        "goto" => {
            let index: usize = parts
                .next()
                .context("usage: goto <index>")?
                .parse()
                .context("index must be a non-negative number")?;
            report(handle.navigate_to(index).await);
        }
        "next" => report(handle.next().await),
        "prev" => report(handle.previous().await),
        "status" => print_status(handle).await,
        "submit" => match handle.submit().await {
            Ok(response) => println!("{}", serde_json::to_string(&response)?),
            Err(e) if e.is_unauthorized() => {
                eprintln!("session expired, log in again: {}", e);
                return Ok(false);
            }
            Err(e) => eprintln!("submission failed (retry with 'submit'): {}", e),
        },
        "quit" | "exit" => return Ok(false),
        other => bail!("unknown command '{}'", other),
    }

    Ok(true)
}

fn report(applied: bool) {
    println!("{}", if applied { "ok" } else { "ignored" });
}

async fn print_status(handle: &AttemptHandle) {
    if let Some(snapshot) = handle.snapshot().await {
        let remaining = snapshot
            .time_remaining
            .map(format_remaining)
            .unwrap_or_else(|| "untimed".to_string());
        println!(
            "question {}/{} | answered {} | flagged {} | time {} | {:?}",
            snapshot.current_index + 1,
            snapshot.question_count,
            snapshot.answered_count,
            snapshot.flagged_count,
            remaining,
            snapshot.lifecycle
        );
    }
}
