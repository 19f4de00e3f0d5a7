// crates/client/src/main.rs
//! runview CLI.
//!
//! Fetches a task-execution trace from the orchestration backend and prints
//! the merged task hierarchy as an indented tree. With `--follow`, keeps a
//! live update subscription open and reprints on every refresh.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use runview_client::{HttpTraceFetcher, SseTransport, TraceFetcher, TraceMonitor, TraceView};
use runview_core::{ExecutionOutput, TaskNode, TaskStatus};

/// Default backend endpoint; override with --url or RUNVIEW_URL.
const DEFAULT_URL: &str = "http://127.0.0.1:8811";

#[derive(Parser)]
#[command(
    name = "runview",
    version,
    about = "Inspect task-execution traces from the orchestration backend"
)]
struct Cli {
    /// Trace identifier to inspect.
    trace_id: String,

    /// Backend base URL.
    #[arg(long, env = "RUNVIEW_URL", default_value = DEFAULT_URL)]
    url: String,

    /// Keep a live subscription open and reprint on every update.
    #[arg(long)]
    follow: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Quiet by default; RUST_LOG overrides.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let cli = Cli::parse();
    let fetcher = Arc::new(HttpTraceFetcher::new(cli.url.clone()));

    if !cli.follow {
        let snapshot = fetcher.fetch_trace(&cli.trace_id).await?;
        print_view(&TraceView::from_snapshot(&snapshot));
        return Ok(());
    }

    let monitor = TraceMonitor::new(fetcher, Arc::new(SseTransport::new(cli.url)));
    monitor.start(&cli.trace_id).await?;

    let mut views = monitor.subscribe();
    let initial = views.borrow().clone();
    if let Some(view) = initial {
        print_view(&view);
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = views.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = views.borrow_and_update().clone();
                if let Some(view) = view {
                    print_view(&view);
                }
            }
        }
    }
    monitor.stop();
    Ok(())
}

fn print_view(view: &TraceView) {
    println!(
        "trace {}: {} executed, {} pending",
        view.trace_id, view.executed_count, view.pending_count
    );
    for root in &view.roots {
        print_node(root);
    }
}

fn print_node(node: &TaskNode) {
    let indent = "  ".repeat(node.level as usize);
    let glyph = if node.is_pending {
        if node.is_executing {
            ">"
        } else {
            "·"
        }
    } else {
        match node.status {
            TaskStatus::Completed => "✓",
            TaskStatus::Error => "✗",
            TaskStatus::Cancelled => "⊘",
            TaskStatus::Running => "▸",
        }
    };
    let name = node.short_name.as_deref().unwrap_or(&node.description);
    match failure_detail(node) {
        Some(detail) => println!("{indent}{glyph} {name} ({detail})"),
        None => println!("{indent}{glyph} {name}"),
    }
    for child in &node.children {
        print_node(child);
    }
}

/// First line of the execution output for errored tasks.
fn failure_detail(node: &TaskNode) -> Option<String> {
    if node.status != TaskStatus::Error {
        return None;
    }
    let phase = node.phases.as_ref()?.execution.as_ref()?;
    let detail = match phase.classified_output() {
        ExecutionOutput::Cli { stderr, .. } if !stderr.is_empty() => stderr,
        ExecutionOutput::Llm { content } => content,
        ExecutionOutput::Text { text } => text,
        _ => return None,
    };
    detail.lines().next().map(str::to_string)
}
