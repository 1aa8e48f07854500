//! feedr-node: runs the price oracle over a stream of blocks.
//!
//! Blocks arrive as JSON lines on stdin or from a file; outcome events are
//! written to stdout as JSON lines. Logs go to stderr.

mod config;
mod driver;
mod events;

use std::path::PathBuf;

use anyhow::Context;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{error, info};

use crate::config::NodeConfig;
use crate::driver::{BlockInput, Driver};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Load config (optional path as first argument)
    let config = NodeConfig::load(std::env::args().nth(1).map(PathBuf::from))?;

    // 2. Initialize tracing
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("feedr={}", config.logging.log_level).parse()?),
        )
        .init();

    info!("feedr node starting");

    // 3. Open database, seeding genesis on first start
    let data_dir = config.data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let db_path = data_dir.join("feedr.db");
    let mut store = feedr_db::SqliteStore::open(&db_path)
        .with_context(|| format!("opening {}", db_path.display()))?;
    if !store.is_initialized()? {
        store.seed_genesis(&config.genesis.params, &config.genesis.validators)?;
    }

    // 4. Block source
    let input: Box<dyn AsyncBufRead + Unpin> = if config.node.blocks_file.is_empty() {
        Box::new(BufReader::new(tokio::io::stdin()))
    } else {
        let file = tokio::fs::File::open(&config.node.blocks_file)
            .await
            .with_context(|| format!("opening {}", config.node.blocks_file))?;
        Box::new(BufReader::new(file))
    };
    let mut lines = input.lines();
    let mut stdout = tokio::io::stdout();

    // 5. Process blocks until input ends or Ctrl-C
    let mut driver = Driver::new(store);
    let result: anyhow::Result<()> = async {
        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line? else {
                        info!("block input exhausted");
                        return Ok(());
                    };
                    if line.trim().is_empty() {
                        continue;
                    }
                    let block: BlockInput = serde_json::from_str(&line).context("parsing block")?;
                    let produced = driver.process(block)?;
                    events::write_all(&mut stdout, &produced).await?;
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Ctrl-C received, shutting down");
                    return Ok(());
                }
            }
        }
    }
    .await;

    if let Err(e) = &result {
        error!("fatal: {e:#}");
    }

    // Graceful shutdown
    drop(driver.shutdown());
    info!("Node stopped");
    result
}
