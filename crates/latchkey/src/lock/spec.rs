use std::time::Duration;

use latchkey_core::{KeyArgs, KeyError, KeyTemplate, LockKey, generate_lock_key};

pub const DEFAULT_MAX_WAIT: Duration = Duration::from_millis(1000);
pub const DEFAULT_LEASE: Duration = Duration::from_millis(5000);

/// Declares how an operation is locked: which key, how long to wait, how
/// long the lease lasts.
///
/// The template is parsed once up front so a malformed expression fails at
/// construction rather than on the first call.
#[derive(Debug, Clone)]
pub struct LockSpec {
    operation: String,
    template: KeyTemplate,
    max_wait: Duration,
    lease: Duration,
}

impl LockSpec {
    pub fn new(operation: impl Into<String>, expression: &str) -> Result<Self, KeyError> {
        Ok(Self {
            operation: operation.into(),
            template: KeyTemplate::parse(expression)?,
            max_wait: DEFAULT_MAX_WAIT,
            lease: DEFAULT_LEASE,
        })
    }

    #[must_use]
    pub fn max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    #[must_use]
    pub fn lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn template(&self) -> &KeyTemplate {
        &self.template
    }

    pub fn max_wait_time(&self) -> Duration {
        self.max_wait
    }

    pub fn lease_time(&self) -> Duration {
        self.lease
    }

    /// Renders the lock key for one call.
    pub fn resolve(&self, args: &KeyArgs) -> Result<LockKey, KeyError> {
        generate_lock_key(&self.operation, &self.template, args)
    }
}
