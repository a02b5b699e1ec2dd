//! # Common types
//!
//! Database-agnostic building blocks shared by the replication session:
//!
//! - [`Position`] - Place in the replication stream, or the live-tail sentinel
//! - [`Mutation`] / [`Value`] - Row-level change events
//! - [`MutationListener`] / [`ListenerSet`] - Ordered observer dispatch
//! - [`bounded_queue`] - Backpressured forwarder into a fixed-capacity queue
//! - [`SessionHandle`] / [`SessionState`] - Read-only view of a running session
//! - [`PositionStore`] / [`CheckpointListener`] - Resumable checkpoints
//! - [`TableFilter`] - Include/exclude table patterns
//! - [`SessionMetrics`] - Counters mirrored into the `metrics` facade
//! - [`Validator`] - Connection parameter validation
//! - [`CdcError`] - Error taxonomy
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Common Module                            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Position      ←─── Written by the session loop only        │
//! │  Mutation      ←─── Produced by the translator              │
//! │  ListenerSet   ←─── Registration-ordered, awaited delivery  │
//! │  QueueProducer ←─── Bounded queue, blocks when full         │
//! │  Checkpoint    ←─── Persist transaction-boundary positions  │
//! │  TableFilter   ←─── Include/exclude tables                  │
//! │  Metrics       ←─── Atomic counters + metrics facade        │
//! └─────────────────────────────────────────────────────────────┘
//! ```

mod checkpoint;
mod error;
mod event;
mod filter;
mod listener;
mod metrics;
mod position;
mod producer;
mod session;
mod validation;

pub use checkpoint::*;
pub use error::*;
pub use event::*;
pub use filter::*;
pub use listener::*;
pub use metrics::*;
pub use position::*;
pub use producer::*;
pub use session::*;
pub use validation::*;
