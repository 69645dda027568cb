//! Handler trait and type erasure.
//!
//! # One shape for middleware and endpoints
//!
//! Every link of a chain is the same kind of thing: an async function that
//! borrows the request's [`Context`] for as long as it runs.
//!
//! ```text
//! fn auth(c: &mut Context) -> BoxFuture<'_> { … }      ← user writes this
//!        ↓ chain![auth, list_users]
//! handler::func(auth)                                   ← Arc<fn item>
//!        ↓  stored as BoxedHandler = Arc<dyn Handler>
//! handler.serve(c)  at request time                     ← one vtable dispatch
//! ```
//!
//! A middleware wraps the rest of the chain by awaiting [`Context::next`]
//! in the middle of its own body; an endpoint simply never calls it.
//!
//! The future borrows the context, so it has to be boxed with that borrow's
//! lifetime, hence [`BoxFuture<'a>`] rather than a `'static` future. Closures
//! work too, as long as they go through [`func`] (or [`chain!`]) so their
//! signature is inferred as higher-ranked:
//!
//! ```rust
//! use mochi::{chain, Context};
//!
//! let handlers = chain![|c: &mut Context| Box::pin(async move {
//!     c.set("seen", true);
//!     c.next().await;
//! })];
//! assert_eq!(handlers.len(), 1);
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::context::Context;

/// A heap-allocated future borrowing the request context for `'a`.
pub type BoxFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// A link of a handler chain: middleware or endpoint.
///
/// Blanket-implemented for every `Fn(&mut Context) -> BoxFuture<'_>`.
/// Implement it on your own type for middleware that carries configuration.
pub trait Handler: Send + Sync + 'static {
    fn serve<'a>(&'a self, c: &'a mut Context) -> BoxFuture<'a>;
}

impl<F> Handler for F
where
    F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a> + Send + Sync + 'static,
{
    fn serve<'a>(&'a self, c: &'a mut Context) -> BoxFuture<'a> {
        (self)(c)
    }
}

/// A type-erased handler shared by every request that runs its chain.
///
/// `Arc` gives cheap, thread-safe shared ownership: building a request's
/// context clones the route's chain (one atomic increment), not the handlers.
pub type BoxedHandler = Arc<dyn Handler>;

/// Erases a function or closure handler.
///
/// Taking the `Fn` bound directly (rather than `impl Handler`) is what lets
/// the compiler infer a closure's signature as `for<'a> Fn(&'a mut Context)
/// -> BoxFuture<'a>` instead of pinning it to one lifetime.
pub fn func<F>(f: F) -> BoxedHandler
where
    F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Erases any [`Handler`] implementation.
pub fn boxed<H: Handler>(handler: H) -> BoxedHandler {
    Arc::new(handler)
}

/// Builds a `Vec<BoxedHandler>` from functions and closures, in order.
///
/// ```rust,ignore
/// api.get("/users", chain![auth, list_users]);
/// ```
#[macro_export]
macro_rules! chain {
    () => { ::std::vec::Vec::<$crate::BoxedHandler>::new() };
    ($($handler:expr),+ $(,)?) => {
        ::std::vec![$($crate::handler::func($handler)),+]
    };
}
