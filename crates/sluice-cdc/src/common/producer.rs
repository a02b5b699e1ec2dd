//! Bounded-queue forwarder
//!
//! [`bounded_queue`] pairs a listener that copies every mutation into a
//! fixed-capacity channel with the consumer end of that channel. When the
//! channel is full the listener's send waits, which holds up the session's
//! read loop until the consumer catches up.
//!
//! ```rust,ignore
//! let (producer, mut queue) = bounded_queue(1024)?;
//! session.register_listener(Arc::new(producer));
//! session.connect(Position::Current).await?;
//!
//! while let Some(mutation) = queue.recv().await {
//!     println!("{}", mutation.to_json());
//! }
//! ```

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::common::{CdcError, Mutation, MutationListener, Result};
use super::SessionHandle;

/// Create a forwarder and its consumer with room for `capacity` mutations.
pub fn bounded_queue(capacity: usize) -> Result<(QueueProducer, MutationQueue)> {
    if capacity == 0 {
        return Err(CdcError::config("Queue capacity must be at least 1"));
    }
    let (tx, rx) = mpsc::channel(capacity);
    Ok((QueueProducer { tx }, MutationQueue { rx, capacity }))
}

/// Listener half: enqueues each delivered mutation.
#[derive(Debug, Clone)]
pub struct QueueProducer {
    tx: mpsc::Sender<Mutation>,
}

impl QueueProducer {
    /// Free slots right now.
    pub fn available(&self) -> usize {
        self.tx.capacity()
    }

    /// Whether the consumer has been dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[async_trait]
impl MutationListener for QueueProducer {
    async fn on_mutation(&self, _session: &SessionHandle, mutation: &Mutation) -> bool {
        if self.tx.capacity() == 0 {
            trace!("Mutation queue full, waiting for consumer");
        }
        match self.tx.send(mutation.clone()).await {
            Ok(()) => true,
            Err(_) => {
                debug!("Mutation queue consumer dropped");
                false
            }
        }
    }

    async fn on_mutation_batch(&self, _session: &SessionHandle, mutations: &[Mutation]) -> bool {
        for mutation in mutations {
            if self.tx.send(mutation.clone()).await.is_err() {
                debug!("Mutation queue consumer dropped");
                return false;
            }
        }
        true
    }
}

/// Consumer half.
#[derive(Debug)]
pub struct MutationQueue {
    rx: mpsc::Receiver<Mutation>,
    capacity: usize,
}

impl MutationQueue {
    /// Next mutation; `None` once every producer is gone and the queue is drained.
    pub async fn recv(&mut self) -> Option<Mutation> {
        self.rx.recv().await
    }

    /// Next mutation if one is already queued.
    pub fn try_recv(&mut self) -> Option<Mutation> {
        self.rx.try_recv().ok()
    }

    /// Next mutation, waiting at most `timeout`.
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Option<Mutation> {
        tokio::time::timeout(timeout, self.rx.recv())
            .await
            .ok()
            .flatten()
    }

    /// Mutations currently queued.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
