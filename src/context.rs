//! The per-request execution context.
//!
//! One [`Context`] exists per request. It owns the request, the response
//! being written, a scratch store, and the cursor over the route's handler
//! chain. Handlers receive it by `&mut`, so the borrow checker already
//! enforces what the chain requires: one task drives one request.
//!
//! # Flow control
//!
//! ```text
//! index = -1 ──next()──▶ 0 ──▶ 1 ──▶ … ──▶ len      completed
//!                        │
//!                        └──abort()──▶ ABORT_INDEX  nothing else runs
//! ```
//!
//! [`Context::next`] advances the cursor and runs every remaining handler.
//! A handler that awaits `next()` itself resumes after the rest of the chain
//! has run; the outer loop then sees a cursor already past the end and does
//! not run anything twice. The cursor only moves forward.
//!
//! The route's declared method is checked at the *last* position only, so
//! shared middleware (logging, auth, metrics) still runs for a request with
//! the wrong method; the endpoint itself is answered with `405`.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use http::{Method, StatusCode};
use http_body_util::Full;
use serde::Serialize;

use crate::error::Error;
use crate::handler::{BoxFuture, BoxedHandler};
use crate::render::{self, Render};
use crate::request::Request;
use crate::response::{self, ResponseWriter};
use crate::scope::Scope;

/// Cursor value meaning "aborted". Every legal chain is shorter than this;
/// route registration enforces it.
pub const ABORT_INDEX: i8 = i8::MAX / 2;

type Keys = HashMap<String, Box<dyn Any + Send + Sync>>;

pub struct Context {
    scope: Scope,
    request: Request,
    writer: ResponseWriter,
    keys: Option<Keys>,
    index: i8,
    handlers: Arc<[BoxedHandler]>,
    method: Method,
    error: Option<Error>,
}

impl Context {
    pub(crate) fn new(
        scope: Scope,
        request: Request,
        handlers: Arc<[BoxedHandler]>,
        method: Method,
    ) -> Self {
        Self {
            scope,
            request,
            writer: ResponseWriter::new(),
            keys: None,
            index: -1,
            handlers,
            method,
            error: None,
        }
    }

    // ── Flow control ──────────────────────────────────────────────────────────

    /// Runs the pending handlers of the chain.
    ///
    /// Call it from middleware to run everything after the current handler
    /// before continuing with your own post-processing.
    pub fn next(&mut self) -> BoxFuture<'_> {
        Box::pin(async move {
            if self.is_aborted() {
                return;
            }
            self.index += 1;
            let len = self.handlers.len() as i8;
            while self.index < len {
                if self.index == len - 1 && self.method != *self.request.method() {
                    self.writer.error(StatusCode::METHOD_NOT_ALLOWED);
                    return;
                }
                let handler = Arc::clone(&self.handlers[self.index as usize]);
                handler.serve(self).await;
                self.index = self.index.saturating_add(1);
            }
        })
    }

    /// Prevents the pending handlers from running. The current one finishes.
    pub fn abort(&mut self) {
        self.index = ABORT_INDEX;
    }

    /// Writes `code` and aborts.
    pub fn abort_with_status(&mut self, code: StatusCode) {
        self.status(code);
        self.abort();
    }

    pub fn is_aborted(&self) -> bool {
        self.index >= ABORT_INDEX
    }

    // ── Scratch store ─────────────────────────────────────────────────────────

    /// Stores a value for the rest of this request. Allocates the store on first use.
    pub fn set(&mut self, key: impl Into<String>, value: impl Any + Send + Sync) {
        self.keys.get_or_insert_with(HashMap::new).insert(key.into(), Box::new(value));
    }

    pub fn get(&self, key: &str) -> Option<&(dyn Any + Send + Sync)> {
        self.keys.as_ref()?.get(key).map(|v| &**v)
    }

    /// Typed lookup; `None` when absent or stored with another type.
    pub fn get_as<T: Any>(&self, key: &str) -> Option<&T> {
        self.get(key)?.downcast_ref::<T>()
    }

    // ── Accessors ─────────────────────────────────────────────────────────────

    /// The request scope: deadline, cancellation and metadata.
    pub fn scope(&self) -> &Scope { &self.scope }
    pub fn request(&self) -> &Request { &self.request }
    pub fn writer(&self) -> &ResponseWriter { &self.writer }
    pub fn writer_mut(&mut self) -> &mut ResponseWriter { &mut self.writer }

    /// The method the matched route was registered with.
    pub fn route_method(&self) -> &Method { &self.method }

    /// The last rendering error, if any.
    pub fn error(&self) -> Option<&Error> { self.error.as_ref() }

    pub fn set_error(&mut self, err: Error) {
        self.error = Some(err);
    }

    // ── Rendering ─────────────────────────────────────────────────────────────

    pub fn status(&mut self, code: StatusCode) {
        self.writer.write_header(code);
    }

    /// Writes a response through `r`. With `code == None` the renderer
    /// decides the status itself (redirects do). Errors are kept on the
    /// context, see [`Context::error`].
    pub fn render(&mut self, code: Option<StatusCode>, r: impl Render) {
        r.write_content_type(&mut self.writer);
        if let Some(code) = code {
            self.status(code);
            if !response::body_allowed(code) {
                return;
            }
        }
        if let Err(err) = r.render(&mut self.writer) {
            self.error = Some(err);
        }
    }

    /// `text/plain` body. Build it with `format!` for formatted output.
    pub fn string(&mut self, code: StatusCode, body: impl Into<String>) {
        self.render(Some(code), render::Text(body.into()));
    }

    /// `200 OK` with the JSON envelope `{code, message, ttl, data}`.
    pub fn json<T: Serialize>(&mut self, errno: i32, message: impl Into<String>, data: T) {
        self.render(
            Some(StatusCode::OK),
            render::Json { code: errno, message: message.into(), ttl: 1, data },
        );
    }

    /// `200 OK` with `data` plus `code` and `message` keys as one JSON object.
    pub fn json_map(
        &mut self,
        errno: i32,
        message: impl Into<String>,
        mut data: serde_json::Map<String, serde_json::Value>,
    ) {
        data.insert("code".to_owned(), errno.into());
        data.insert("message".to_owned(), message.into().into());
        self.render(Some(StatusCode::OK), render::MapJson(data));
    }

    pub fn bytes(&mut self, code: StatusCode, content_type: impl AsRef<str>, chunks: Vec<Bytes>) {
        self.render(
            Some(code),
            render::Data { content_type: content_type.as_ref().to_owned(), chunks },
        );
    }

    pub fn redirect(&mut self, code: StatusCode, location: impl Into<String>) {
        self.render(None, render::Redirect { code, location: location.into() });
    }

    pub(crate) fn into_response(self) -> http::Response<Full<Bytes>> {
        self.writer.into_response()
    }
}
