use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::info;

use deskbook::clock::SystemClock;
use deskbook::command::{dispatch_raw, OperationResult};
use deskbook::config::EngineConfig;
use deskbook::engine::Engine;
use deskbook::notify::NotifyHub;

/// Reads one JSON request per line on stdin and writes one JSON result per line on stdout.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let metrics_port: Option<u16> = std::env::var("DESKBOOK_METRICS_PORT")
        .ok()
        .and_then(|s| s.parse().ok());
    deskbook::observability::init(metrics_port)?;

    let data_dir = std::env::var("DESKBOOK_DATA_DIR").unwrap_or_else(|_| "./data".into());
    let compact_threshold: u64 = std::env::var("DESKBOOK_COMPACT_THRESHOLD")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(1000);
    let config = match std::env::var("DESKBOOK_CONFIG") {
        Ok(path) => EngineConfig::load(&PathBuf::from(path))?,
        Err(_) => EngineConfig::default(),
    };

    std::fs::create_dir_all(&data_dir)?;
    let journal_path = PathBuf::from(&data_dir).join("deskbook.journal");
    let engine = Arc::new(Engine::open(
        &journal_path,
        config,
        Arc::new(SystemClock),
        Arc::new(NotifyHub::new()),
    )?);
    tokio::spawn(deskbook::compactor::run_compactor(engine.clone(), compact_threshold));

    info!("deskbook ready");
    info!("  journal: {}", journal_path.display());
    info!("  compact threshold: {compact_threshold}");
    info!("  metrics: {}", metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics")));

    let mut lines = BufReader::new(tokio::io::stdin()).split(b'\n');
    let mut stdout = tokio::io::stdout();
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            line = lines.next_segment() => {
                let Some(line) = line? else { break };
                let Some(result) = dispatch_raw(&engine, &line).await else { continue };
                respond(&mut stdout, &result).await?;
            }
            _ = &mut shutdown => {
                info!("shutdown signal received");
                break;
            }
        }
    }

    if let Err(e) = engine.compact_journal().await {
        tracing::warn!("final compaction failed: {e}");
    }
    info!("deskbook stopped");
    Ok(())
}

async fn respond(stdout: &mut tokio::io::Stdout, result: &OperationResult) -> std::io::Result<()> {
    let mut out = serde_json::to_vec(result)
        .or_else(|e| serde_json::to_vec(&OperationResult::malformed(e.to_string())))?;
    out.push(b'\n');
    stdout.write_all(&out).await?;
    stdout.flush().await
}
