//! # sluice-cdc - MySQL binlog change data capture
//!
//! Connects to a MySQL source as a replica, decodes the row-based binary log
//! and delivers row-level mutations to registered listeners, in order and
//! with backpressure.
//!
//! ## Features
//!
//! - `information-schema` (default) - resolve column names through
//!   `INFORMATION_SCHEMA.COLUMNS` for sources that do not log them
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐
//! │ MySQL source │
//! └──────┬───────┘
//!        │ COM_BINLOG_DUMP
//!        ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │                  ReplicationSession                      │
//! │  EventDecoder → SchemaContext → MutationTranslator       │
//! └──────────────────────────────────────────────────────────┘
//!        │ Mutation { Insert / Update / Delete }
//!        ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │   MutationListener (QueueProducer, CheckpointListener)   │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! # async fn example() -> sluice_cdc::Result<()> {
//! use sluice_cdc::{bounded_queue, Position, ReplicationSession, SessionConfig};
//! use std::sync::Arc;
//!
//! let session = ReplicationSession::new(
//!     SessionConfig::new("localhost", "replicator").with_password("secret"),
//! )?;
//!
//! let (producer, mut queue) = bounded_queue(1024)?;
//! session.register_listener(Arc::new(producer));
//! session.connect(Position::Current).await?;
//!
//! while let Some(mutation) = queue.recv().await {
//!     println!("{}", mutation.to_json());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Public API Organization
//!
//! Core types are re-exported at the crate root. Wire-level building blocks
//! (packet codec, event decoder, table maps) live under [`mysql`]; shared
//! plumbing (listeners, checkpoints, metrics) under [`common`].

pub mod common;
pub mod mysql;

// Core types
pub use common::{
    bounded_queue, CdcError, ErrorCategory, Mutation, MutationListener, MutationMetadata,
    MutationOp, MutationQueue, Position, QueueProducer, Result, Value,
};

// Checkpointing
pub use common::{CheckpointListener, FilePositionStore, MemoryPositionStore, PositionStore};

// Session
pub use common::{SessionHandle, SessionState};
pub use mysql::{DispatchMode, ReplicationSession, SessionConfig, SessionOutcome};
