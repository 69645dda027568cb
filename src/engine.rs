//! The engine: route table, per-path overrides, injections, and the
//! per-request bootstrap.
//!
//! # Request bootstrap
//!
//! ```text
//! http::Request ─▶ buffer body, parse form
//!               ─▶ effective timeout   config default
//!                                      → MethodConfig for the exact path
//!                                      → client x-mochi-timeout, if smaller
//!               ─▶ metadata            remote ip/port, caller, mirror, timeout
//!               ─▶ Scope               background + metadata + deadline (or cancel only)
//!               ─▶ Context::next()     the route's pre-merged chain
//!               ─▶ cancel the scope, convert the writer into a response
//! ```
//!
//! The route table and the injection list are written during setup. The
//! method configs and the server config may also change while traffic is
//! live, so each sits behind its own lock and is only held for a copy.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::header::{CONTENT_TYPE, HeaderValue, X_CONTENT_TYPE_OPTIONS};
use http::{HeaderMap, Method, StatusCode};
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use parking_lot::{Mutex, RwLock};
use regex::Regex;
use tracing::warn;

use crate::config::{MethodConfig, ServerConfig};
use crate::context::Context;
use crate::error::Result;
use crate::form::{self, FormError};
use crate::handler::{BoxedHandler, Handler};
use crate::headers;
use crate::metadata;
use crate::request::Request;
use crate::response::ContentType;
use crate::router::{RouterGroup, Routes};
use crate::scope::Scope;
use crate::server::Running;

/// A registered chain. One per absolute path.
#[derive(Clone)]
pub(crate) struct Route {
    pub(crate) method: Method,
    pub(crate) handlers: Arc<[BoxedHandler]>,
}

struct Injection {
    pattern: Regex,
    handlers: Vec<BoxedHandler>,
}

/// Engine state shared by route groups, the accept loop and connection tasks.
pub(crate) struct Shared {
    routes: RwLock<HashMap<String, Route>>,
    method_configs: RwLock<HashMap<String, MethodConfig>>,
    injections: RwLock<Vec<Injection>>,
    conf: RwLock<ServerConfig>,
    pub(crate) server: Mutex<Option<Running>>,
}

impl Shared {
    fn new(conf: ServerConfig) -> Self {
        Self {
            routes: RwLock::new(HashMap::new()),
            method_configs: RwLock::new(HashMap::new()),
            injections: RwLock::new(Vec::new()),
            conf: RwLock::new(conf),
            server: Mutex::new(None),
        }
    }

    pub(crate) fn config(&self) -> ServerConfig {
        self.conf.read().clone()
    }

    pub(crate) fn route(&self, path: &str) -> Option<Route> {
        self.routes.read().get(path).cloned()
    }

    pub(crate) fn add_route(&self, method: Method, path: &str, handlers: Vec<BoxedHandler>) {
        let mut routes = self.routes.write();
        if let Some(existing) = routes.get(path) {
            panic!("mochi: path `{path}` already registered for {}", existing.method);
        }
        routes.insert(path.to_owned(), Route { method, handlers: handlers.into() });
    }

    pub(crate) fn method_config(&self, path: &str) -> Option<MethodConfig> {
        self.method_configs.read().get(path).copied()
    }

    pub(crate) fn set_method_config(&self, path: &str, config: MethodConfig) {
        self.method_configs.write().insert(path.to_owned(), config);
    }

    /// Handlers of the first injection, in registration order, whose pattern
    /// matches `absolute_path`.
    pub(crate) fn injections_for(&self, absolute_path: &str) -> Vec<BoxedHandler> {
        self.injections
            .read()
            .iter()
            .find(|i| i.pattern.is_match(absolute_path))
            .map(|i| i.handlers.clone())
            .unwrap_or_default()
    }

    /// Config default, replaced by the path's method config, replaced by the
    /// client's budget when that is smaller. Zero means no deadline.
    fn effective_timeout(&self, path: &str, headers: &HeaderMap) -> Duration {
        let mut timeout = self.conf.read().timeout;
        if let Some(config) = self.method_config(path) {
            timeout = config.timeout;
        }
        if let Some(client) = headers::client_timeout(headers) {
            if timeout > client {
                timeout = client;
            }
        }
        timeout
    }

    /// Runs the full bootstrap for one request.
    pub(crate) async fn serve_http<B>(
        &self,
        req: http::Request<B>,
        peer: SocketAddr,
    ) -> http::Response<Full<Bytes>>
    where
        B: hyper::body::Body,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let (parts, body) = req.into_parts();
        let Some(route) = self.route(parts.uri.path()) else {
            return not_found();
        };

        let (body, form) = match Limited::new(body, form::MAX_BODY_BYTES).collect().await {
            Ok(collected) => {
                let body = collected.to_bytes();
                let form = form::parse(&parts.headers, parts.uri.query(), &body).await;
                (body, form)
            }
            Err(e) if e.is::<LengthLimitError>() => {
                warn!(peer = %peer, limit = form::MAX_BODY_BYTES, "request body too large");
                (Bytes::new(), Err(FormError::TooLarge))
            }
            Err(e) => {
                warn!(peer = %peer, "failed to read request body: {e}");
                (Bytes::new(), Err(FormError::Body(e.to_string())))
            }
        };

        let timeout = self.effective_timeout(parts.uri.path(), &parts.headers);
        let md = headers::request_metadata(&parts.headers, peer, timeout);
        let scope = metadata::attach(&Scope::background(), md);
        let (scope, guard) = if timeout.is_zero() {
            scope.with_cancel()
        } else {
            scope.with_timeout(timeout)
        };

        let request = Request::new(parts, body, peer, form);
        let mut c = Context::new(scope, request, route.handlers, route.method);
        c.next().await;
        guard.cancel();

        c.into_response()
    }
}

fn not_found() -> http::Response<Full<Bytes>> {
    let mut res = http::Response::new(Full::new(Bytes::from_static(b"404 page not found\n")));
    *res.status_mut() = StatusCode::NOT_FOUND;
    res.headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(ContentType::Text.as_str()));
    res.headers_mut()
        .insert(X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    res
}

/// The application: a root route group plus everything needed to serve it.
///
/// ```rust,no_run
/// use mochi::{chain, Context, Engine, Routes, StatusCode};
///
/// #[tokio::main]
/// async fn main() -> mochi::Result<()> {
///     let mut engine = Engine::new();
///     engine.use_handler(mochi::middleware::logger());
///     engine.get("/hello", chain![|c: &mut Context| Box::pin(async move {
///         c.string(StatusCode::OK, "hello");
///     })]);
///     engine.run().await
/// }
/// ```
pub struct Engine {
    root: RouterGroup,
    shared: Arc<Shared>,
}

impl Engine {
    /// An engine with the default configuration and no middleware.
    pub fn new() -> Self {
        let shared = Arc::new(Shared::new(ServerConfig::default()));
        Self { root: RouterGroup::root(&shared), shared }
    }

    /// An engine with `conf`, validated first.
    pub fn with_config(conf: ServerConfig) -> Result<Self> {
        let engine = Self::new();
        engine.set_config(conf)?;
        Ok(engine)
    }

    /// Replaces the configuration. A rejected config leaves the current one in place.
    ///
    /// Listener settings take effect on the next [`start`](Engine::start);
    /// the default timeout applies to the next request.
    pub fn set_config(&self, mut conf: ServerConfig) -> Result<()> {
        conf.validate()?;
        *self.shared.conf.write() = conf;
        Ok(())
    }

    pub fn config(&self) -> ServerConfig {
        self.shared.config()
    }

    /// Overrides the request budget for one absolute path. Safe while serving.
    pub fn set_method_config(&self, path: &str, config: MethodConfig) {
        self.shared.set_method_config(path, config);
    }

    /// Registers middleware spliced in front of every route registered
    /// *afterwards* whose absolute path matches `pattern`. Only the first
    /// matching injection applies to a route.
    ///
    /// # Panics
    ///
    /// If `pattern` is not a valid regular expression.
    pub fn inject(&mut self, pattern: &str, handlers: Vec<BoxedHandler>) -> &mut Self {
        let pattern = Regex::new(pattern)
            .unwrap_or_else(|e| panic!("mochi: invalid injection pattern `{pattern}`: {e}"));
        self.shared.injections.write().push(Injection { pattern, handlers });
        self
    }

    /// Creates a route group under `relative_path`.
    pub fn group(&self, relative_path: &str, middleware: Vec<BoxedHandler>) -> RouterGroup {
        self.root.group(relative_path, middleware)
    }

    /// The engine's own group.
    pub fn root_group(&self) -> &RouterGroup {
        &self.root
    }

    /// Registers the health-check chain at `GET /monitor/ping`.
    pub fn ping(&mut self, handlers: Vec<BoxedHandler>) -> &mut Self {
        self.get("/monitor/ping", handlers)
    }

    /// Registers the discovery chain at `GET /register`.
    pub fn register(&mut self, handlers: Vec<BoxedHandler>) -> &mut Self {
        self.get("/register", handlers)
    }

    /// Every registered `(method, path)`, sorted by path.
    pub fn routes(&self) -> Vec<(Method, String)> {
        let mut routes: Vec<_> = self
            .shared
            .routes
            .read()
            .iter()
            .map(|(path, route)| (route.method.clone(), path.clone()))
            .collect();
        routes.sort_by(|a, b| a.1.cmp(&b.1));
        routes
    }

    /// Dispatches one in-memory request through the full bootstrap, without
    /// a listener. `peer` stands in for the connection's remote address.
    pub async fn serve_http<B>(&self, req: http::Request<B>, peer: SocketAddr) -> http::Response<Full<Bytes>>
    where
        B: hyper::body::Body,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        self.shared.serve_http(req, peer).await
    }

    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }
}

impl Default for Engine {
    fn default() -> Self { Self::new() }
}

impl Routes for Engine {
    fn use_fn(&mut self, middleware: Vec<BoxedHandler>) -> &mut Self {
        self.root.use_fn(middleware);
        self
    }

    fn use_handler(&mut self, middleware: impl Handler) -> &mut Self {
        self.root.use_handler(middleware);
        self
    }

    fn handle(&mut self, method: &str, path: &str, handlers: Vec<BoxedHandler>) -> &mut Self {
        self.root.handle(method, path, handlers);
        self
    }
}
