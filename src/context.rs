//! Routing context
//!
//! The routing context records which [`RoutingTarget`] is current for the
//! executing unit of work. Connection resolvers read it through
//! [`current_target`]; nothing else ever needs to know about it.
//!
//! The context is a small per-thread stack. It is only ever mutated through
//! scoped acquisition:
//!
//! - [`with_target`] (and the [`on_replica`] / [`on_master`] shorthands) for
//!   synchronous closures, backed by the RAII [`TargetGuard`]
//! - [`TargetScope`] (via [`WithTargetExt::with_target`]) for futures
//!
//! A [`TargetScope`] pushes its target only while the inner future is being
//! polled and pops it before `poll` returns. A worker thread therefore never
//! carries routing state between polls: tasks scheduled on the same thread
//! cannot observe each other's target, and a scoped future that is dropped
//! half-way (cancelled, timed out) leaves nothing behind.
//!
//! # Example
//!
//! ```
//! use diesel_replica::context::{current_target, on_replica, with_target};
//! use diesel_replica::RoutingTarget;
//!
//! assert_eq!(current_target(), RoutingTarget::Master);
//!
//! on_replica(|| {
//!     assert_eq!(current_target(), RoutingTarget::Replica);
//!
//!     with_target(RoutingTarget::Master, || {
//!         assert_eq!(current_target(), RoutingTarget::Master);
//!     });
//!
//!     assert_eq!(current_target(), RoutingTarget::Replica);
//! });
//!
//! assert_eq!(current_target(), RoutingTarget::Master);
//! ```

use std::cell::RefCell;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::target::RoutingTarget;

thread_local! {
    static TARGET_STACK: RefCell<Vec<RoutingTarget>> = const { RefCell::new(Vec::new()) };
}

/// The target for the current unit of work
///
/// Returns [`RoutingTarget::Master`] when no scope is active.
pub fn current_target() -> RoutingTarget {
    TARGET_STACK.with(|stack| stack.borrow().last().copied().unwrap_or_default())
}

/// Number of routing scopes active on this thread
pub fn scope_depth() -> usize {
    TARGET_STACK.with(|stack| stack.borrow().len())
}

/// Push `target` onto the routing context until the returned guard drops
///
/// The guard restores the stack to the depth it had before this call, so
/// early returns and unwinding both restore the enclosing target.
pub fn enter(target: RoutingTarget) -> TargetGuard {
    let depth = TARGET_STACK.with(|stack| {
        let mut stack = stack.borrow_mut();
        let depth = stack.len();
        stack.push(target);
        depth
    });
    tracing::trace!(routing_target = %target, depth, "entered routing scope");

    TargetGuard {
        depth,
        target,
        _not_send: PhantomData,
    }
}

/// Run `f` with `target` as the current routing target
///
/// The prior target is restored before this returns, whether `f` returns
/// normally, returns an `Err`, or panics.
pub fn with_target<F, R>(target: RoutingTarget, f: F) -> R
where
    F: FnOnce() -> R,
{
    let _guard = enter(target);
    f()
}

/// Run `f` against the replica
pub fn on_replica<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    with_target(RoutingTarget::Replica, f)
}

/// Run `f` against the master
pub fn on_master<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    with_target(RoutingTarget::Master, f)
}

/// RAII guard for an active routing scope
///
/// The guard is tied to the thread that created it and cannot be held across
/// an `.await` in a `Send` future; use [`TargetScope`] for async code.
#[derive(Debug)]
#[must_use = "the routing scope ends as soon as the guard is dropped"]
pub struct TargetGuard {
    depth: usize,
    target: RoutingTarget,
    _not_send: PhantomData<*const ()>,
}

impl TargetGuard {
    /// The target this guard pushed
    pub fn target(&self) -> RoutingTarget {
        self.target
    }
}

impl Drop for TargetGuard {
    fn drop(&mut self) {
        // The thread-local may already be gone during thread teardown.
        let _ = TARGET_STACK.try_with(|stack| stack.borrow_mut().truncate(self.depth));
        tracing::trace!(routing_target = %self.target, depth = self.depth, "left routing scope");
    }
}

/// A future that runs its inner future inside a routing scope
///
/// With no target the adapter is a pure pass-through and never touches the
/// routing context.
#[derive(Debug)]
#[must_use = "futures do nothing unless polled"]
pub struct TargetScope<F> {
    target: Option<RoutingTarget>,
    inner: F,
}

impl<F> TargetScope<F> {
    /// Scope `inner` to `target`
    pub fn new(target: RoutingTarget, inner: F) -> Self {
        Self {
            target: Some(target),
            inner,
        }
    }

    /// Scope `inner` to `target` if one is given, otherwise pass through
    pub fn optional(target: Option<RoutingTarget>, inner: F) -> Self {
        Self { target, inner }
    }

    /// Wrap `inner` without changing the routing context
    pub fn passthrough(inner: F) -> Self {
        Self {
            target: None,
            inner,
        }
    }

    /// The target pushed while polling, if any
    pub fn target(&self) -> Option<RoutingTarget> {
        self.target
    }

    /// Unwrap the inner future
    pub fn into_inner(self) -> F {
        self.inner
    }
}

impl<F: Future> Future for TargetScope<F> {
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // Safety: `inner` is never moved out of a pinned `TargetScope` and the
        // type has no `Drop` impl, so projecting the pin to it is sound.
        let this = unsafe { self.get_unchecked_mut() };
        let inner = unsafe { Pin::new_unchecked(&mut this.inner) };

        match this.target {
            Some(target) => {
                let _guard = enter(target);
                inner.poll(cx)
            }
            None => inner.poll(cx),
        }
    }
}

/// Extension trait for scoping futures to a routing target
pub trait WithTargetExt: Future + Sized {
    /// Run this future with `target` as the current routing target
    fn with_target(self, target: RoutingTarget) -> TargetScope<Self> {
        TargetScope::new(target, self)
    }
}

impl<F: Future> WithTargetExt for F {}
