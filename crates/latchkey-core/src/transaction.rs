//! Transaction completion hooks.
//!
//! A lock acquired inside a transaction must stay held until the transaction
//! commits or rolls back, otherwise a second writer can read state the first
//! one has not made durable yet. The lock manager therefore registers its
//! release as an after-completion callback on whatever transaction is active.

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use tracing::{debug, warn};

/// How a transaction finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionOutcome {
    Committed,
    RolledBack,
}

/// Work to run once the enclosing transaction has finished.
pub type CompletionCallback = Box<dyn FnOnce(TransactionOutcome) -> BoxFuture<'static, ()> + Send>;

/// Access to the caller's current transaction, if any.
pub trait TransactionContext: Send + Sync {
    fn is_active(&self) -> bool;

    /// Registers `callback` to run after commit or rollback.
    ///
    /// Returns the callback back when no transaction is active, so the caller
    /// can run it immediately.
    fn register_after_completion(
        &self,
        callback: CompletionCallback,
    ) -> Result<(), CompletionCallback>;
}

/// The context used outside of any transaction.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTransaction;

impl TransactionContext for NoTransaction {
    fn is_active(&self) -> bool {
        false
    }

    fn register_after_completion(
        &self,
        callback: CompletionCallback,
    ) -> Result<(), CompletionCallback> {
        Err(callback)
    }
}

#[derive(Default)]
struct ScopeState {
    finished: bool,
    callbacks: Vec<CompletionCallback>,
}

/// A minimal unit-of-work scope that runs registered callbacks on completion.
///
/// Callbacks run in registration order. A scope dropped without `commit` or
/// `rollback` is treated as rolled back.
#[derive(Default)]
pub struct TransactionScope {
    state: Mutex<ScopeState>,
}

impl TransactionScope {
    pub fn begin() -> Self {
        Self::default()
    }

    pub fn pending_callbacks(&self) -> usize {
        self.state.lock().callbacks.len()
    }

    pub async fn commit(self) {
        self.complete(TransactionOutcome::Committed).await;
    }

    pub async fn rollback(self) {
        self.complete(TransactionOutcome::RolledBack).await;
    }

    async fn complete(&self, outcome: TransactionOutcome) {
        let callbacks = self.take_callbacks();
        debug!(?outcome, callbacks = callbacks.len(), "Transaction completed");
        for callback in callbacks {
            callback(outcome).await;
        }
    }

    fn take_callbacks(&self) -> Vec<CompletionCallback> {
        let mut state = self.state.lock();
        state.finished = true;
        std::mem::take(&mut state.callbacks)
    }
}

impl TransactionContext for TransactionScope {
    fn is_active(&self) -> bool {
        !self.state.lock().finished
    }

    fn register_after_completion(
        &self,
        callback: CompletionCallback,
    ) -> Result<(), CompletionCallback> {
        let mut state = self.state.lock();
        if state.finished {
            return Err(callback);
        }
        state.callbacks.push(callback);
        Ok(())
    }
}

impl Drop for TransactionScope {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if state.finished || state.callbacks.is_empty() {
            return;
        }
        let callbacks = std::mem::take(&mut state.callbacks);
        warn!(
            callbacks = callbacks.len(),
            "Transaction scope dropped without completion; treating as rolled back"
        );
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    for callback in callbacks {
                        callback(TransactionOutcome::RolledBack).await;
                    }
                });
            }
            Err(_) => {
                warn!("No runtime available; dropping completion callbacks without running them");
            }
        }
    }
}
