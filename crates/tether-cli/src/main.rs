//! tether - terminal harness for the session engine

mod agents;
mod config;
mod render;

use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tether_agent::{Agent, Session, SessionConfig};
use tether_wire::{Frame, Output, ReaderInput, Tag, WriterOutput};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

/// tether - drive a session from the terminal
#[derive(Parser, Debug)]
#[command(name = "tether")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Model name reported in system frames
    #[arg(short, long)]
    model: Option<String>,

    /// Model endpoint reported in system frames
    #[arg(long)]
    base_url: Option<String>,

    /// Maximum number of queued prompts (default: 10)
    #[arg(short, long)]
    queue_capacity: Option<usize>,

    /// Replay agent events from a JSON script instead of echoing
    #[arg(short, long)]
    script: Option<PathBuf>,

    /// Speak raw TLV frames on stdin/stdout instead of lines of text
    #[arg(long)]
    raw: bool,

    /// Verbose output (logs go to stderr)
    #[arg(short, long)]
    verbose: bool,

    /// Initialize config file
    #[arg(long)]
    init_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Setup tracing; stdout carries the frame stream
    let filter = if args.verbose {
        EnvFilter::new("tether=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    // Initialize config and exit
    if args.init_config {
        match config::Config::init() {
            Ok(path) => {
                println!("Config file created at: {}", path.display());
                println!("\nExample config:\n{}", config::example_config());
            }
            Err(e) => {
                eprintln!("Error creating config: {}", e);
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    // Load config file
    let cfg = config::Config::load();

    // Merge config with CLI args (CLI takes precedence)
    let mut session_config = SessionConfig::default()
        .with_model(args.model.or(cfg.model).unwrap_or_else(|| "echo".to_string()))
        .with_base_url(args.base_url.or(cfg.base_url).unwrap_or_default());
    if let Some(capacity) = args.queue_capacity.or(cfg.queue_capacity) {
        session_config = session_config.with_queue_capacity(capacity);
    }

    let agent: Arc<dyn Agent> = match args.script.or(cfg.script.map(PathBuf::from)) {
        Some(path) => Arc::new(agents::ScriptAgent::from_path(&path)?),
        None => Arc::new(agents::EchoAgent::default()),
    };

    if args.raw {
        run_raw(session_config, agent).await
    } else {
        run_lines(session_config, agent).await
    }
}

/// Frames in, frames out: the adaptor contract over stdio.
async fn run_raw(config: SessionConfig, agent: Arc<dyn Agent>) -> anyhow::Result<()> {
    let output: Arc<dyn Output> = Arc::new(WriterOutput::new(std::io::stdout()));
    let session = Session::new(config, agent, output);
    tracing::info!(session = %session.id(), "raw mode");

    let mut input = ReaderInput::new(tokio::io::stdin());
    tokio::select! {
        result = session.serve(&mut input) => result?,
        _ = interrupted(&session, tokio::signal::ctrl_c) => return Ok(()),
    }

    drain(&session, tokio::signal::ctrl_c).await;
    Ok(())
}

/// One prompt or `/command` per line, output rendered as text.
async fn run_lines(config: SessionConfig, agent: Arc<dyn Agent>) -> anyhow::Result<()> {
    let output: Arc<dyn Output> = Arc::new(render::TextRenderer::new(std::io::stdout()));
    let session = Session::new(config, agent, output);

    if std::io::IsTerminal::is_terminal(&std::io::stderr()) {
        eprintln!("tether ({}) session: {}", session.config().model, session.id());
        eprintln!("Commands: /summarize /cancel /usage. Ctrl-C cancels, or exits when idle.");
        eprintln!();
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) => session.handle_frame(Frame::new(Tag::UserText, line.trim_end())),
                None => break,
            },
            _ = interrupted(&session, tokio::signal::ctrl_c) => return Ok(()),
        }
    }

    drain(&session, tokio::signal::ctrl_c).await;
    Ok(())
}

/// Wait for queued work to finish. Interrupts still cancel the running task,
/// and one that finds nothing to cancel stops the wait.
async fn drain<F, Fut>(session: &Session, next_interrupt: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = io::Result<()>>,
{
    tokio::select! {
        _ = session.wait_for_idle() => {}
        _ = interrupted(session, next_interrupt) => {}
    }
}

/// Resolves on an interrupt that finds nothing to cancel.
async fn interrupted<F, Fut>(session: &Session, mut next_interrupt: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = io::Result<()>>,
{
    loop {
        if next_interrupt().await.is_err() {
            // no signal handler available; never shut down from here
            std::future::pending::<()>().await;
        }
        if !session.cancel_current() {
            return;
        }
        // let the cancelled turn settle before the next interrupt
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
