//! Kyodo command-line host.
//!
//! Loads a document into an in-memory buffer, dispatches one instruction
//! to agent sessions, and prints the edited document once every session
//! has finished.
//!
//! Usage:
//!   # Fill the demo agreement's salary with the offline planner
//!   cargo run -p kyodo-cli -- "Set the salary"
//!
//!   # Two section agents, with a human selection they must ask about
//!   cargo run -p kyodo-cli -- "Fix Section 1 and Section 2" --select 40..60
//!
//!   # A real model, configured in RON
//!   cargo run -p kyodo-cli -- "Tighten the termination clause" --document lease.txt --config kyodo.ron

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use kyodo_crdt::{MemoryBuffer, PresenceHub, SharedBuffer, TextBuffer};
use kyodo_kernel::{
    ApprovalHook, ChannelApprover, CursorOverlay, EditHistory, EngineConfig, MemoryView, Orchestrator,
    PendingApproval, StaticApprover, TextView, Workspace, build_service,
};
use kyodo_types::{PeerId, TextRange};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, fmt};

const DEMO_DOCUMENT: &str = "EMPLOYMENT AGREEMENT

1. PARTIES
This Employment Agreement is entered into between Acme Corp (the \"Company\") and [INSERT_EMPLOYEE_NAME] (the \"Employee\").

2. COMPENSATION
The Employee shall receive an annual salary of [INSERT_SALARY], payable in accordance with the Company's standard payroll schedule.

3. START DATE
Employment shall commence on [INSERT_START_DATE].

4. TERMINATION
Either party may terminate this Agreement with thirty (30) days written notice.";

/// Run agent sessions against a document.
#[derive(Parser, Debug)]
#[command(name = "kyodo")]
#[command(about = "Concurrent agent editing over a shared text buffer")]
struct Args {
    /// What the agents should do. `Section N` mentions fan out to one agent each.
    instruction: String,

    /// Document to edit (defaults to a demo employment agreement)
    #[arg(short, long)]
    document: Option<PathBuf>,

    /// RON engine config
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the per-character pacing from the config
    #[arg(long)]
    pacing_ms: Option<u64>,

    /// Simulate a human selection, as START..END char offsets
    #[arg(long, value_parser = parse_selection)]
    select: Option<TextRange>,

    /// Approve every conflicting edit without prompting
    #[arg(long)]
    approve: bool,
}

fn parse_selection(raw: &str) -> Result<TextRange, String> {
    let (start, end) = raw
        .split_once("..")
        .ok_or_else(|| format!("expected START..END, got {raw:?}"))?;
    let start: usize = start.trim().parse().map_err(|e| format!("bad start: {e}"))?;
    let end: usize = end.trim().parse().map_err(|e| format!("bad end: {e}"))?;
    Ok(TextRange::new(start, end))
}

/// Ask on the terminal for each pending approval, one at a time.
async fn prompt_approvals(mut pending: mpsc::Receiver<PendingApproval>) {
    while let Some(approval) = pending.recv().await {
        let request = &approval.request;
        eprintln!(
            "\n{} wants to replace {:?} with {:?} near your selection. Allow? [y/N]",
            request.display_name, request.current, request.replacement
        );
        let answer = tokio::task::spawn_blocking(|| {
            let mut line = String::new();
            std::io::stdin().lock().read_line(&mut line).map(|_| line)
        })
        .await;
        let approved = matches!(answer, Ok(Ok(line)) if line.trim().eq_ignore_ascii_case("y"));
        approval.respond(approved);
    }
}

fn load_config(args: &Args) -> Result<EngineConfig> {
    let mut config = match &args.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    if let Some(pacing_ms) = args.pacing_ms {
        config.pacing_ms = pacing_ms;
    }
    Ok(config)
}

fn load_document(args: &Args) -> Result<String> {
    match &args.document {
        Some(path) => std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display())),
        None => Ok(DEMO_DOCUMENT.to_string()),
    }
}

fn print_report(orchestrator: &Orchestrator, history: &EditHistory) {
    for session in orchestrator.registry().list() {
        eprintln!(
            "[{}] {} ({}) {}%",
            session.status, session.display.display_name, session.section, session.progress
        );
        for entry in &session.log {
            eprintln!("    {}", entry.message);
        }
    }

    let ledger = &orchestrator.workspace().ledger;
    if !ledger.is_empty() {
        eprintln!("\nHighlights:");
        for record in ledger.records() {
            eprintln!("  {} {:?} ({})", record.color, record.snippet, record.section);
        }
    }

    eprintln!("\nRecent edits: {}", history.len());
    for entry in history.entries().iter().take(10) {
        eprintln!("  {:<6} {:<28} {:?}", entry.kind.as_ref(), entry.origin, entry.snippet);
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;
    let text = load_document(&args)?;

    let buffer: SharedBuffer = Arc::new(MemoryBuffer::new(""));
    let presence = Arc::new(PresenceHub::new().join(PeerId::new()));
    let view = Arc::new(MemoryView::new(buffer.clone()));

    let approver: Arc<dyn ApprovalHook> = if args.approve {
        Arc::new(StaticApprover(true))
    } else {
        let (approver, pending) = ChannelApprover::new(8);
        tokio::spawn(prompt_approvals(pending));
        Arc::new(approver)
    };

    let reasoner = build_service(&config.reasoning);
    tracing::info!(reasoner = reasoner.name(), pacing_ms = config.pacing_ms, "engine configured");

    let debounce = config.cursor_debounce();
    let history = Arc::new(EditHistory::new(config.history_capacity, config.snippet_len));
    let workspace = Workspace::new(buffer.clone(), presence.clone(), view.clone(), approver, config);
    let orchestrator = Orchestrator::new(workspace, reasoner);
    orchestrator.seed(&text)?;

    if let Some(selection) = args.select {
        if selection.end > buffer.len() {
            bail!("selection {}..{} is past the end of the document", selection.start, selection.end);
        }
        view.set_selection(selection);
    }

    let shutdown = CancellationToken::new();
    let overlay = CursorOverlay::new(buffer.clone(), presence, view.clone(), debounce);
    let overlay_task = tokio::spawn({
        let cancel = shutdown.clone();
        async move { overlay.run(cancel).await }
    });
    let history_task = tokio::spawn(history.clone().track(buffer.clone(), shutdown.clone()));
    let ledger_task = tokio::spawn(
        orchestrator
            .workspace()
            .ledger
            .clone()
            .replicate(orchestrator.workspace().presence.clone(), shutdown.clone()),
    );
    // Let them subscribe before the first edit lands.
    tokio::task::yield_now().await;

    let ids = orchestrator.dispatch(&args.instruction)?;
    tracing::info!(sessions = ids.len(), "dispatched");
    orchestrator.join_all().await;

    shutdown.cancel();
    let _ = tokio::join!(overlay_task, history_task, ledger_task);

    print_report(&orchestrator, &history);
    println!("{}", buffer.full_text());
    Ok(())
}
