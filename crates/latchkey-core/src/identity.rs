//! Current-user lookup for per-user view-count suppression.

use std::future::Future;

tokio::task_local! {
    static REQUEST_USER: Option<String>;
}

/// Resolves the authenticated user of the current call, if any.
pub trait IdentityProvider: Send + Sync {
    fn current_user_id(&self) -> Option<String>;
}

/// Never reports a user.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnonymousIdentity;

impl IdentityProvider for AnonymousIdentity {
    fn current_user_id(&self) -> Option<String> {
        None
    }
}

/// Always reports the same user. Useful for jobs and tests.
#[derive(Debug, Clone)]
pub struct FixedIdentity(pub String);

impl FixedIdentity {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self(user_id.into())
    }
}

impl IdentityProvider for FixedIdentity {
    fn current_user_id(&self) -> Option<String> {
        Some(self.0.clone())
    }
}

/// Reads the user bound to the current task by [`RequestIdentity::scope`].
///
/// ```
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// use latchkey_core::{IdentityProvider, RequestIdentity};
///
/// let user = RequestIdentity::scope(Some("42".into()), async {
///     RequestIdentity.current_user_id()
/// })
/// .await;
/// assert_eq!(user.as_deref(), Some("42"));
/// assert_eq!(RequestIdentity.current_user_id(), None);
/// # }
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestIdentity;

impl RequestIdentity {
    /// Runs `fut` with `user` as the current identity.
    pub async fn scope<F: Future>(user: Option<String>, fut: F) -> F::Output {
        REQUEST_USER.scope(user, fut).await
    }
}

impl IdentityProvider for RequestIdentity {
    fn current_user_id(&self) -> Option<String> {
        REQUEST_USER.try_with(Clone::clone).ok().flatten()
    }
}
