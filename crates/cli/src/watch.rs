//! Long-running watch mode.
//!
//! Keeps a [`TriggerCoordinator`] alive with its startup and background
//! triggers, and optionally reads host events from stdin, one per line:
//!
//! ```text
//! save <path> [<path>...]
//! sync | pull | push | status | validate
//! resolve <keep-local|keep-remote>
//! abort-merge
//! quit
//! ```

use std::time::Duration;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing::{debug, info, warn};

use vaultsync_core::conflict::ResolutionStrategy;
use vaultsync_core::coordinator::{TriggerCoordinator, TriggerResponse};
use vaultsync_core::git::GitClient;
use vaultsync_core::models::TriggerSource;

use crate::signals::Shutdown;
use crate::style;

/// A host event read from stdin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Save(Vec<String>),
    Sync,
    Pull,
    Push,
    Status,
    Validate,
    Resolve(ResolutionStrategy),
    AbortMerge,
    Quit,
}

/// Parse one event line. Blank lines and `#` comments yield `Ok(None)`.
pub fn parse_event(line: &str) -> Result<Option<Event>, String> {
    let mut words = line.split_whitespace();
    let Some(command) = words.next() else {
        return Ok(None);
    };
    if command.starts_with('#') {
        return Ok(None);
    }
    let rest: Vec<String> = words.map(str::to_string).collect();

    let event = match command {
        "save" if rest.is_empty() => return Err("save needs at least one path".into()),
        "save" => Event::Save(rest),
        "sync" => Event::Sync,
        "pull" => Event::Pull,
        "push" => Event::Push,
        "status" => Event::Status,
        "validate" => Event::Validate,
        "resolve" => match rest.as_slice() {
            [strategy] => Event::Resolve(strategy.parse()?),
            _ => return Err("usage: resolve <keep-local|keep-remote>".into()),
        },
        "abort-merge" => Event::AbortMerge,
        "quit" | "exit" => Event::Quit,
        other => return Err(format!("unknown event '{other}'")),
    };
    Ok(Some(event))
}

/// Run until a shutdown signal or a `quit` event, then cancel pending timers
/// and wait for any in-flight request.
pub async fn run(
    coordinator: TriggerCoordinator<GitClient>,
    shutdown: Shutdown,
    stdin_events: bool,
) -> Result<()> {
    coordinator.start_background();

    let startup = coordinator.request_startup().await;
    if !matches!(startup, TriggerResponse::Disabled) {
        print_response("startup", &startup);
    }

    let mut lines = stdin_events.then(|| BufReader::new(tokio::io::stdin()).lines());
    println!(
        "{}",
        style::dim("Watching for changes. Press Ctrl+C to stop.")
    );

    loop {
        tokio::select! {
            _ = shutdown.wait() => break,
            line = next_line(&mut lines) => match line {
                Ok(Some(line)) => match parse_event(&line) {
                    Ok(Some(Event::Quit)) => break,
                    Ok(Some(event)) => dispatch(&coordinator, event),
                    Ok(None) => {}
                    Err(e) => println!("{}", style::error(&e)),
                },
                Ok(None) => {
                    debug!("event stream closed");
                    lines = None;
                }
                Err(e) => {
                    warn!(error = %e, "failed to read events, ignoring stdin");
                    lines = None;
                }
            },
        }
    }

    coordinator.shutdown();
    while coordinator.is_in_flight() {
        debug!("waiting for in-flight request to finish");
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    info!(
        cycles = coordinator.completed_cycles(),
        shutdown_signal = shutdown.is_requested(),
        "watch stopped"
    );
    Ok(())
}

async fn next_line(lines: &mut Option<Lines<BufReader<Stdin>>>) -> std::io::Result<Option<String>> {
    match lines {
        Some(lines) => lines.next_line().await,
        None => std::future::pending().await,
    }
}

/// Hand an event to the coordinator without blocking the event loop; an
/// event that arrives while a request is running is answered `Busy`.
fn dispatch(coordinator: &TriggerCoordinator<GitClient>, event: Event) {
    if let Event::Save(files) = event {
        let response = coordinator.request_save(files);
        print_response("save", &response);
        return;
    }

    let coordinator = coordinator.clone();
    tokio::spawn(async move {
        let (label, response) = match event {
            Event::Sync => ("sync", coordinator.request_sync(TriggerSource::Manual, None).await),
            Event::Pull => ("pull", coordinator.request_pull().await),
            Event::Push => ("push", coordinator.request_push(None).await),
            Event::Status => ("status", coordinator.request_status().await),
            Event::Validate => ("validate", coordinator.request_validate().await),
            Event::Resolve(strategy) => (
                "resolve",
                coordinator.request_resolve_conflicts(strategy).await,
            ),
            Event::AbortMerge => ("abort-merge", coordinator.request_abort_merge().await),
            Event::Save(_) | Event::Quit => return,
        };
        print_response(label, &response);
    });
}

fn print_response(label: &str, response: &TriggerResponse) {
    let stamp = chrono::Local::now().format("%H:%M:%S").to_string();
    println!(
        "{} {} {}",
        style::dim(&stamp),
        style::dim(label),
        style::response(response)
    );
    if let TriggerResponse::Completed(outcome) = response {
        for warning in &outcome.warnings {
            println!("         {}", style::warn(warning));
        }
        for path in &outcome.conflicted_files {
            println!("         {}", style::dim(&format!("conflict: {path}")));
        }
    }
}
