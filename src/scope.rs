//! Request scope: cancellation, deadline, and attached metadata.
//!
//! A [`Scope`] is an immutable node. Deriving a child never changes the
//! parent:
//!
//! ```text
//! Scope::background()                 no deadline, never cancelled
//!   └─ metadata::attach(.., md)       same, plus md
//!        └─ with_timeout(1s)          deadline = now + 1s, cancellable
//!             └─ with_timeout(5s)     deadline stays at the earlier 1s
//! ```
//!
//! Cancellation flows down the tree: cancelling a parent cancels every child
//! derived from it, never the other way round. Children inherit the nearest
//! metadata and the earliest deadline of their ancestors.
//!
//! The framework never interrupts a handler. Long-running work observes
//! [`Scope::done`] or [`Scope::error`] and stops on its own.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::metadata::Metadata;

/// Why a scope finished.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ScopeError {
    /// The scope (or an ancestor) was cancelled explicitly.
    Cancelled,
    /// The scope's deadline passed.
    DeadlineExceeded,
}

impl fmt::Display for ScopeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancelled => f.write_str("scope cancelled"),
            Self::DeadlineExceeded => f.write_str("scope deadline exceeded"),
        }
    }
}

impl std::error::Error for ScopeError {}

/// A cheaply cloneable, immutable request scope.
#[derive(Clone)]
pub struct Scope {
    inner: Arc<Inner>,
}

struct Inner {
    metadata: Option<Metadata>,
    token: Option<CancellationToken>,
    deadline: Option<Instant>,
}

impl Scope {
    /// The root scope: no metadata, no deadline, never cancelled.
    pub fn background() -> Self {
        Self {
            inner: Arc::new(Inner { metadata: None, token: None, deadline: None }),
        }
    }

    /// Returns a child carrying `metadata`. Cancellation and deadline are inherited.
    pub(crate) fn with_metadata(&self, metadata: Metadata) -> Self {
        Self {
            inner: Arc::new(Inner {
                metadata: Some(metadata),
                token: self.inner.token.clone(),
                deadline: self.inner.deadline,
            }),
        }
    }

    /// Returns a cancellable child and the guard that cancels it.
    pub fn with_cancel(&self) -> (Self, CancelGuard) {
        self.derive(self.inner.deadline)
    }

    /// Returns a child whose deadline is `timeout` from now, or the parent's
    /// deadline if that comes first. A timeout too large to represent as an
    /// instant leaves the child without a deadline of its own.
    pub fn with_timeout(&self, timeout: Duration) -> (Self, CancelGuard) {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.with_deadline(deadline),
            None => self.with_cancel(),
        }
    }

    /// Returns a child bounded by `deadline`, or by the parent's deadline if
    /// that comes first. A deadline, once set, can only ever move earlier.
    pub fn with_deadline(&self, deadline: Instant) -> (Self, CancelGuard) {
        let deadline = match self.inner.deadline {
            Some(parent) if parent < deadline => parent,
            _ => deadline,
        };
        self.derive(Some(deadline))
    }

    fn derive(&self, deadline: Option<Instant>) -> (Self, CancelGuard) {
        let token = match &self.inner.token {
            Some(parent) => parent.child_token(),
            None => CancellationToken::new(),
        };
        let scope = Self {
            inner: Arc::new(Inner {
                metadata: self.inner.metadata.clone(),
                token: Some(token.clone()),
                deadline,
            }),
        };
        (scope, CancelGuard { token: Some(token) })
    }

    /// The nearest metadata attached to this scope or one of its ancestors.
    pub fn metadata(&self) -> Option<&Metadata> {
        self.inner.metadata.as_ref()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    /// `None` while the scope is live; afterwards, why it finished.
    ///
    /// A passed deadline is reported as [`ScopeError::DeadlineExceeded`] even
    /// if the scope was also cancelled afterwards.
    pub fn error(&self) -> Option<ScopeError> {
        if self.inner.deadline.is_some_and(|d| Instant::now() >= d) {
            return Some(ScopeError::DeadlineExceeded);
        }
        match &self.inner.token {
            Some(token) if token.is_cancelled() => Some(ScopeError::Cancelled),
            _ => None,
        }
    }

    pub fn is_done(&self) -> bool {
        self.error().is_some()
    }

    /// Resolves once the scope is cancelled or its deadline passes.
    /// Never resolves for a background scope.
    pub async fn done(&self) {
        let sleep = async {
            match self.inner.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };
        let cancelled = async {
            match &self.inner.token {
                Some(token) => token.cancelled().await,
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            () = sleep => {}
            () = cancelled => {}
        }
    }
}

impl Default for Scope {
    fn default() -> Self { Self::background() }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("metadata", &self.inner.metadata)
            .field("deadline", &self.inner.deadline)
            .field("error", &self.error())
            .finish()
    }
}

/// Cancels the scope it was created with, exactly once.
///
/// Dropping the guard cancels too, so a scope is released on every exit
/// path, a panic unwinding through the chain included.
#[must_use = "dropping the guard cancels the scope immediately"]
pub struct CancelGuard {
    token: Option<CancellationToken>,
}

impl CancelGuard {
    pub fn cancel(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(token) = self.token.take() {
            token.cancel();
        }
    }
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── Background ────────────────────────────────────────────────────────────

    #[test]
    fn background_is_never_done() {
        let scope = Scope::background();
        assert!(scope.deadline().is_none());
        assert!(scope.metadata().is_none());
        assert_eq!(scope.error(), None);
    }

    // ── Cancellation ──────────────────────────────────────────────────────────

    #[tokio::test]
    async fn cancel_guard_cancels_scope_and_children() {
        let (parent, guard) = Scope::background().with_cancel();
        let (child, _child_guard) = parent.with_cancel();

        guard.cancel();

        assert_eq!(parent.error(), Some(ScopeError::Cancelled));
        assert_eq!(child.error(), Some(ScopeError::Cancelled));
        child.done().await;
    }

    #[test]
    fn cancelling_child_leaves_parent_alive() {
        let (parent, _guard) = Scope::background().with_cancel();
        let (child, child_guard) = parent.with_cancel();

        drop(child_guard);

        assert!(child.is_done());
        assert!(!parent.is_done());
    }

    // ── Deadlines ─────────────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn deadline_expires() {
        let (scope, _guard) = Scope::background().with_timeout(Duration::from_millis(50));
        assert_eq!(scope.error(), None);

        scope.done().await;

        assert_eq!(scope.error(), Some(ScopeError::DeadlineExceeded));
    }

    #[test]
    fn unrepresentable_timeout_means_no_deadline() {
        let (scope, _guard) = Scope::background().with_timeout(Duration::MAX);
        assert!(scope.deadline().is_none());
        assert!(!scope.is_done());

        let (parent, _g1) = Scope::background().with_timeout(Duration::from_secs(1));
        let (child, _g2) = parent.with_timeout(Duration::MAX);
        assert_eq!(child.deadline(), parent.deadline());
    }

    #[tokio::test(start_paused = true)]
    async fn child_cannot_extend_parent_deadline() {
        let (parent, _g1) = Scope::background().with_timeout(Duration::from_millis(10));
        let (child, _g2) = parent.with_timeout(Duration::from_secs(10));

        assert_eq!(child.deadline(), parent.deadline());
    }

    #[tokio::test(start_paused = true)]
    async fn child_may_shorten_parent_deadline() {
        let (parent, _g1) = Scope::background().with_timeout(Duration::from_secs(10));
        let (child, _g2) = parent.with_timeout(Duration::from_millis(10));

        assert!(child.deadline() < parent.deadline());
    }
}
