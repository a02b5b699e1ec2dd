//! Mutation observers and in-order dispatch
//!
//! Listeners are invoked from the session's read loop, one at a time, in
//! registration order. Every callback is awaited before the loop reads the
//! next packet, so a slow listener throttles replication. Callbacks that
//! panic are caught, logged and counted as a non-acknowledging delivery;
//! later listeners still receive the mutation.

use async_trait::async_trait;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, RwLock};
use tracing::warn;

use crate::common::Mutation;
use super::SessionHandle;

/// Observer of replicated mutations.
///
/// The returned `bool` acknowledges handling. Dispatch never skips later
/// listeners on `false`; the value is reported in metrics only.
#[async_trait]
pub trait MutationListener: Send + Sync {
    /// Handle a single mutation.
    async fn on_mutation(&self, session: &SessionHandle, mutation: &Mutation) -> bool;

    /// Handle several mutations in stream order.
    ///
    /// The default delivers them one by one and acknowledges only if every
    /// call did.
    async fn on_mutation_batch(&self, session: &SessionHandle, mutations: &[Mutation]) -> bool {
        let mut acked = true;
        for mutation in mutations {
            acked &= self.on_mutation(session, mutation).await;
        }
        acked
    }

    /// The session reached `Streaming`.
    async fn on_connect(&self, _session: &SessionHandle) {}

    /// The session stopped, gracefully or not. `session.last_error()` tells which.
    async fn on_disconnect(&self, _session: &SessionHandle) {}
}

/// Ordered collection of listeners.
///
/// Cloning shares the collection. Registration during streaming takes effect
/// from the next dispatched event.
#[derive(Clone, Default)]
pub struct ListenerSet {
    listeners: Arc<RwLock<Vec<Arc<dyn MutationListener>>>>,
}

impl std::fmt::Debug for ListenerSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerSet")
            .field("listeners", &self.len())
            .finish()
    }
}

impl ListenerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a listener.
    pub fn register(&self, listener: Arc<dyn MutationListener>) {
        self.listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(listener);
    }

    pub fn len(&self) -> usize {
        self.listeners.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self) -> Vec<Arc<dyn MutationListener>> {
        self.listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Deliver mutations to every listener in registration order.
    ///
    /// A single mutation goes through `on_mutation`, more than one through
    /// `on_mutation_batch`. Returns how many listeners did not acknowledge.
    pub async fn dispatch(&self, session: &SessionHandle, mutations: &[Mutation]) -> usize {
        if mutations.is_empty() {
            return 0;
        }

        let mut rejected = 0;
        for (index, listener) in self.snapshot().iter().enumerate() {
            let delivery = match mutations {
                [single] => AssertUnwindSafe(listener.on_mutation(session, single))
                    .catch_unwind()
                    .await,
                batch => AssertUnwindSafe(listener.on_mutation_batch(session, batch))
                    .catch_unwind()
                    .await,
            };

            match delivery {
                Ok(true) => {}
                Ok(false) => rejected += 1,
                Err(panic) => {
                    warn!(
                        "Listener #{} panicked while handling {} mutation(s): {}",
                        index,
                        mutations.len(),
                        panic_message(&panic)
                    );
                    rejected += 1;
                }
            }
        }
        rejected
    }

    /// Invoke `on_connect` on every listener.
    pub async fn notify_connect(&self, session: &SessionHandle) {
        for (index, listener) in self.snapshot().iter().enumerate() {
            if let Err(panic) = AssertUnwindSafe(listener.on_connect(session))
                .catch_unwind()
                .await
            {
                warn!(
                    "Listener #{} panicked in on_connect: {}",
                    index,
                    panic_message(&panic)
                );
            }
        }
    }

    /// Invoke `on_disconnect` on every listener.
    pub async fn notify_disconnect(&self, session: &SessionHandle) {
        for (index, listener) in self.snapshot().iter().enumerate() {
            if let Err(panic) = AssertUnwindSafe(listener.on_disconnect(session))
                .catch_unwind()
                .await
            {
                warn!(
                    "Listener #{} panicked in on_disconnect: {}",
                    index,
                    panic_message(&panic)
                );
            }
        }
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "<non-string panic payload>"
    }
}
