//! # mochi
//!
//! A minimal HTTP framework: exact-path routes, grouped middleware chains,
//! request metadata, and a per-request timeout negotiated with the caller.
//!
//! ## The request pipeline
//!
//! Routes are resolved at registration. Each absolute path maps to one
//! finished handler chain:
//!
//! ```text
//! first matching injection  ++  group middleware, root to leaf  ++  route handlers
//! ```
//!
//! At request time the engine only has to:
//!
//! - compute the effective timeout: config default, then the path's
//!   [`MethodConfig`], then the client's `x-mochi-timeout` when smaller
//! - build the request [`Metadata`](metadata::Metadata): remote IP and port,
//!   caller, mirror flag, timeout
//! - attach both to a [`Scope`] and run the chain through a [`Context`]
//!
//! Middleware wraps the rest of the chain by awaiting [`Context::next`], and
//! short-circuits with [`Context::abort`]. Only the last handler is gated on
//! the route's method, so shared middleware still sees a request that ends
//! in `405`.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use mochi::{chain, middleware, BoxFuture, Context, Engine, Routes, StatusCode};
//!
//! #[tokio::main]
//! async fn main() -> mochi::Result<()> {
//!     let mut engine = Engine::new();
//!     engine.use_handler(middleware::recovery()).use_handler(middleware::logger());
//!
//!     let mut api = engine.group("/api", chain![auth]);
//!     api.get("/users", chain![list_users]);
//!
//!     engine.run().await
//! }
//!
//! fn auth(c: &mut Context) -> BoxFuture<'_> {
//!     Box::pin(async move {
//!         if c.request().header("authorization").is_none() {
//!             return c.abort_with_status(StatusCode::UNAUTHORIZED);
//!         }
//!         c.next().await;
//!     })
//! }
//!
//! fn list_users(c: &mut Context) -> BoxFuture<'_> {
//!     Box::pin(async move {
//!         c.json(0, "ok", ["alice", "bob"]);
//!     })
//! }
//! ```
//!
//! ## Background work
//!
//! The request scope is cancelled as soon as the chain returns. Work that
//! must outlive the request takes [`metadata::detach`] first: a fresh scope
//! with no deadline, carrying a copy of the request metadata.

mod config;
mod context;
mod engine;
mod error;
mod form;
mod method;
mod path;
mod request;
mod response;
mod router;
mod scope;
mod server;

pub mod handler;
pub mod headers;
pub mod health;
pub mod metadata;
pub mod middleware;
pub mod render;

pub use config::{MethodConfig, ServerConfig, parse_duration};
pub use context::{ABORT_INDEX, Context};
pub use engine::Engine;
pub use error::{Error, Result};
pub use form::{Form, FormError, FormFile};
pub use handler::{BoxFuture, BoxedHandler, Handler};
pub use request::Request;
pub use response::{ContentType, ResponseWriter};
pub use router::{RouterGroup, Routes};
pub use scope::{CancelGuard, Scope, ScopeError};

pub use http::{Method, StatusCode};
