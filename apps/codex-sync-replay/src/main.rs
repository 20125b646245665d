#![cfg_attr(test, allow(clippy::expect_used))]

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use codex_sync::{
    ConversationState, DebugRecord, DebugTrace, InboundEvent, MAX_DEBUG_LOG_CAPACITY,
    OfflineAgentClient, RingDebugSink, SyncConfig, SyncEngine,
};
use serde::Serialize;

/// Feed a recorded JSON-lines event log through the sync engine and print
/// the resulting conversation state.
#[derive(Parser, Debug)]
#[command(name = "codex-sync-replay")]
struct Args {
    /// Event log with one `{workspaceId, message}` object per line; `-` reads stdin.
    #[arg(long, default_value = "-")]
    events: String,

    /// Write the retained debug records to this file as JSON lines.
    #[arg(long)]
    trace_out: Option<PathBuf>,

    /// Override the number of debug records retained.
    #[arg(long)]
    debug_capacity: Option<usize>,

    /// Pretty-print the snapshot.
    #[arg(long)]
    pretty: bool,
}

#[derive(Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReplayStats {
    lines: usize,
    events: usize,
    skipped: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ReplayReport<'a> {
    stats: &'a ReplayStats,
    state: &'a ConversationState,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let stdout = io::stdout();
    let mut out = stdout.lock();
    run(&args, &mut out)
}

fn run(args: &Args, out: &mut impl Write) -> Result<()> {
    let mut config = SyncConfig::from_env().context("load sync config")?;
    if let Some(capacity) = args.debug_capacity {
        config.debug_log_capacity = capacity.clamp(1, MAX_DEBUG_LOG_CAPACITY);
    }

    let sink = Arc::new(RingDebugSink::new(config.debug_log_capacity));
    let engine = SyncEngine::with_trace(
        config,
        Arc::new(OfflineAgentClient::new("replay has no agent process")),
        DebugTrace::new(sink.clone()),
    );

    let stats = if args.events == "-" {
        replay(io::stdin().lock(), &engine)?
    } else {
        let file = File::open(&args.events)
            .with_context(|| format!("open event log {}", args.events))?;
        replay(BufReader::new(file), &engine)?
    };
    tracing::info!(
        lines = stats.lines,
        events = stats.events,
        skipped = stats.skipped,
        "replay finished"
    );

    if let Some(path) = args.trace_out.as_deref() {
        write_trace(path, &sink.records())?;
    }

    let snapshot = engine.snapshot();
    let report = ReplayReport {
        stats: &stats,
        state: &snapshot,
    };
    let encoded = if args.pretty {
        serde_json::to_writer_pretty(&mut *out, &report)
    } else {
        serde_json::to_writer(&mut *out, &report)
    };
    encoded.context("encode replay report")?;
    writeln!(out).context("write replay report")?;
    Ok(())
}

fn replay(reader: impl BufRead, engine: &SyncEngine) -> Result<ReplayStats> {
    let mut stats = ReplayStats::default();
    for (index, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("read event log line {}", index + 1))?;
        stats.lines += 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<InboundEvent>(line) {
            Ok(event) => {
                engine.handle_event(&event);
                stats.events += 1;
            }
            Err(error) => {
                tracing::warn!(line = index + 1, error = %error, "skipping malformed event line");
                stats.skipped += 1;
            }
        }
    }
    Ok(stats)
}

fn write_trace(path: &Path, records: &[DebugRecord]) -> Result<()> {
    let file =
        File::create(path).with_context(|| format!("create trace file {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    for record in records {
        serde_json::to_writer(&mut writer, record).context("encode debug record")?;
        writeln!(writer).context("write debug record")?;
    }
    writer.flush().context("flush trace file")?;
    Ok(())
}
