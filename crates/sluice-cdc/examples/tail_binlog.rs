/// Tail a MySQL binlog
///
/// Streams row changes from a MySQL source to stdout as JSON lines and
/// saves the checkpoint to a file, so a restart resumes where it stopped.
///
/// Prerequisites:
/// 1. MySQL 5.6+ with `binlog_format=ROW`
/// 2. A user with REPLICATION SLAVE and REPLICATION CLIENT privileges
///
/// Run with:
/// ```
/// SLUICE_CONFIG=session.json cargo run --example tail_binlog
/// ```
///
/// where `session.json` holds any subset of the session settings, e.g.
/// `{"host": "localhost", "user": "replicator", "password": "secret", "read_timeout": 90}`.
use sluice_cdc::common::PositionStore;
use sluice_cdc::{
    bounded_queue, CheckpointListener, FilePositionStore, Position, ReplicationSession,
    SessionConfig,
};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let config: SessionConfig = match std::env::var("SLUICE_CONFIG") {
        Ok(path) => serde_json::from_str(&tokio::fs::read_to_string(path).await?)?,
        Err(_) => SessionConfig::default(),
    };
    let checkpoint_path =
        std::env::var("SLUICE_CHECKPOINT").unwrap_or_else(|_| "sluice.checkpoint".to_string());

    let store = Arc::new(FilePositionStore::new(checkpoint_path));
    let start = store.load().await?.unwrap_or(Position::Current);

    let session = ReplicationSession::new(config)?;
    let (producer, mut queue) = bounded_queue(1024)?;
    session.register_listener(Arc::new(producer));
    session.register_listener(Arc::new(CheckpointListener::new(store, 500)));

    println!("Starting from {}", start);
    session.connect(start).await?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            println!("\nShutting down...");
        }
        _ = async {
            while let Some(mutation) = queue.recv().await {
                println!("{}", mutation.to_json());
            }
        } => {}
        outcome = session.join() => {
            if let Err(e) = outcome {
                eprintln!("Replication stopped: {}", e);
            }
        }
    }

    session.disconnect().await?;
    println!("Stopped at {}", session.checkpoint_position());
    Ok(())
}
