//! Route groups and the registration surface.
//!
//! A [`RouterGroup`] is a node in a tree of path prefixes. It owns its own
//! middleware list and resolves everything eagerly: a child's base path and
//! handler list are computed when the child is created, and a route's full
//! chain is computed when the route is registered. Nothing about the tree is
//! consulted at request time; the engine only sees exact paths mapped to
//! finished chains.
//!
//! ```text
//! engine            [logger]                 base "/"
//!  └─ group("/api") [logger, auth]           base "/api"
//!      └─ get("/users", [list])  →  "/api/users": [inject.., logger, auth, list]
//! ```
//!
//! Every merge copies. Middleware added to a group later on reaches only
//! routes and children created after the call.

use std::sync::{Arc, Weak};

use tracing::debug;

use crate::config::MethodConfig;
use crate::context::ABORT_INDEX;
use crate::engine::Shared;
use crate::handler::{self, BoxedHandler, Handler};
use crate::{method, path};

/// Registration operations shared by [`RouterGroup`] and [`Engine`](crate::Engine).
///
/// Registration mistakes (a bad method, a relative path, an empty or
/// oversized chain, a path registered twice) panic: they are programmer
/// errors found at startup, not conditions to handle at runtime.
pub trait Routes {
    /// Appends middleware to this group's own list.
    fn use_fn(&mut self, middleware: Vec<BoxedHandler>) -> &mut Self;

    /// Appends one middleware value, for handlers that carry state.
    fn use_handler(&mut self, middleware: impl Handler) -> &mut Self;

    /// Registers `handlers` for `method` at `path`, relative to this group.
    /// The last handler is the endpoint; only it is gated on `method`.
    fn handle(&mut self, method: &str, path: &str, handlers: Vec<BoxedHandler>) -> &mut Self;

    fn get(&mut self, path: &str, handlers: Vec<BoxedHandler>) -> &mut Self {
        self.handle("GET", path, handlers)
    }

    fn post(&mut self, path: &str, handlers: Vec<BoxedHandler>) -> &mut Self {
        self.handle("POST", path, handlers)
    }

    fn put(&mut self, path: &str, handlers: Vec<BoxedHandler>) -> &mut Self {
        self.handle("PUT", path, handlers)
    }

    fn delete(&mut self, path: &str, handlers: Vec<BoxedHandler>) -> &mut Self {
        self.handle("DELETE", path, handlers)
    }

    fn head(&mut self, path: &str, handlers: Vec<BoxedHandler>) -> &mut Self {
        self.handle("HEAD", path, handlers)
    }
}

/// A path prefix with its own middleware.
pub struct RouterGroup {
    handlers: Vec<BoxedHandler>,
    base_path: String,
    engine: Weak<Shared>,
    root: bool,
    base_config: Option<MethodConfig>,
}

impl RouterGroup {
    pub(crate) fn root(engine: &Arc<Shared>) -> Self {
        Self {
            handlers: Vec::new(),
            base_path: "/".to_owned(),
            engine: Arc::downgrade(engine),
            root: true,
            base_config: None,
        }
    }

    /// Creates a child group under `relative_path`, extending this group's
    /// middleware with `middleware`. The child also inherits the group's
    /// method config.
    pub fn group(&self, relative_path: &str, middleware: Vec<BoxedHandler>) -> RouterGroup {
        RouterGroup {
            handlers: self.combine(&[], &middleware),
            base_path: self.absolute_path(relative_path),
            engine: Weak::clone(&self.engine),
            root: false,
            base_config: self.base_config,
        }
    }

    /// Applies `config` to every route registered through this group from now on.
    pub fn set_method_config(&mut self, config: MethodConfig) -> &mut Self {
        self.base_config = Some(config);
        self
    }

    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    /// Whether this is the engine's own group.
    pub fn is_root(&self) -> bool {
        self.root
    }

    fn absolute_path(&self, relative_path: &str) -> String {
        path::join(&self.base_path, relative_path)
    }

    fn engine(&self) -> Arc<Shared> {
        self.engine
            .upgrade()
            .unwrap_or_else(|| panic!("mochi: route group `{}` outlived its engine", self.base_path))
    }

    /// `prefix`, then this group's handlers, then `suffix`, as a fresh vector.
    ///
    /// # Panics
    ///
    /// When the result would not leave room for the abort sentinel.
    fn combine(&self, prefix: &[BoxedHandler], suffix: &[BoxedHandler]) -> Vec<BoxedHandler> {
        let size = prefix.len() + self.handlers.len() + suffix.len();
        if size >= ABORT_INDEX as usize {
            panic!("mochi: too many handlers ({size}), a chain holds at most {}", ABORT_INDEX - 1);
        }
        let mut merged = Vec::with_capacity(size);
        merged.extend(prefix.iter().cloned());
        merged.extend(self.handlers.iter().cloned());
        merged.extend(suffix.iter().cloned());
        merged
    }
}

impl Routes for RouterGroup {
    fn use_fn(&mut self, middleware: Vec<BoxedHandler>) -> &mut Self {
        self.handlers.extend(middleware);
        self
    }

    fn use_handler(&mut self, middleware: impl Handler) -> &mut Self {
        self.handlers.push(handler::boxed(middleware));
        self
    }

    fn handle(&mut self, method: &str, relative_path: &str, handlers: Vec<BoxedHandler>) -> &mut Self {
        let method = method::parse(method);
        if !relative_path.starts_with('/') {
            panic!("mochi: path `{relative_path}` must begin with '/'");
        }
        if handlers.is_empty() {
            panic!("mochi: route {method} {relative_path} has no handler");
        }

        let engine = self.engine();
        let absolute_path = self.absolute_path(relative_path);
        let injected = engine.injections_for(&absolute_path);
        let chain = self.combine(&injected, &handlers);

        debug!(%method, path = %absolute_path, handlers = chain.len(), "route registered");
        engine.add_route(method, &absolute_path, chain);
        if let Some(config) = self.base_config {
            engine.set_method_config(&absolute_path, config);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use std::panic::{AssertUnwindSafe, catch_unwind};
    use std::time::Duration;

    use bytes::Bytes;
    use http::StatusCode;
    use http_body_util::Empty;
    use parking_lot::Mutex;

    use crate::engine::Engine;
    use crate::{Context, chain};

    use super::*;

    fn noop(_c: &mut Context) -> crate::BoxFuture<'_> {
        Box::pin(async {})
    }

    fn many(n: usize) -> Vec<BoxedHandler> {
        (0..n).map(|_| handler::func(noop)).collect()
    }

    fn chain_len(engine: &Engine, path: &str) -> usize {
        engine.shared().route(path).map(|r| r.handlers.len()).unwrap_or(0)
    }

    // ── composition ───────────────────────────────────────────────────────────

    #[test]
    fn group_paths_are_absolute_and_nested() {
        let engine = Engine::new();
        let api = engine.group("/api", chain![]);
        let v1 = api.group("v1/", chain![]);

        assert_eq!(api.base_path(), "/api");
        assert_eq!(v1.base_path(), "/api/v1/");
        assert!(engine.root_group().is_root());
        assert!(!v1.is_root());
    }

    #[test]
    fn child_snapshot_ignores_later_parent_middleware() {
        let mut engine = Engine::new();
        engine.use_fn(many(1));
        let mut api = engine.group("/api", many(2));
        engine.use_fn(many(5));

        api.get("/users", many(1));

        assert_eq!(chain_len(&engine, "/api/users"), 4);
    }

    fn named(log: &Arc<Mutex<Vec<&'static str>>>, name: &'static str) -> Vec<BoxedHandler> {
        let log = Arc::clone(log);
        chain![move |c: &mut Context| {
            let log = Arc::clone(&log);
            Box::pin(async move {
                log.lock().push(name);
                c.next().await;
            }) as crate::BoxFuture<'_>
        }]
    }

    async fn run(engine: &Engine, path: &str) {
        let req = http::Request::get(path).body(Empty::<Bytes>::new()).unwrap();
        engine.serve_http(req, "127.0.0.1:1".parse().unwrap()).await;
    }

    #[tokio::test]
    async fn route_chain_is_injection_then_groups_then_route() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut engine = Engine::new();
        engine.inject("^/api/", named(&log, "inject"));
        engine.inject("^/api/users", named(&log, "shadowed"));
        engine.use_fn(named(&log, "root_mw"));
        let mut api = engine.group("/api", named(&log, "group_mw"));
        let mut v1 = api.group("/v1", named(&log, "nested_mw"));

        api.get("/users", named(&log, "users"));
        v1.get("/items", named(&log, "items"));
        api.get("/../health", named(&log, "health"));

        run(&engine, "/api/users").await;
        assert_eq!(*log.lock(), ["inject", "root_mw", "group_mw", "users"]);

        log.lock().clear();
        run(&engine, "/api/v1/items").await;
        assert_eq!(*log.lock(), ["inject", "root_mw", "group_mw", "nested_mw", "items"]);

        log.lock().clear();
        run(&engine, "/health").await;
        assert_eq!(*log.lock(), ["root_mw", "group_mw", "health"]);
    }

    #[test]
    fn injection_counts_toward_the_chain_limit() {
        let mut engine = Engine::new();
        engine.inject("^/big$", many(1));
        engine.use_fn(many(60));

        let result = catch_unwind(AssertUnwindSafe(|| {
            engine.get("/big", many(2));
        }));

        assert!(result.is_err());
        assert!(engine.routes().is_empty());
    }

    #[test]
    fn group_method_config_applies_to_its_routes_and_children() {
        let engine = Engine::new();
        let mut slow = engine.group("/slow", chain![]);
        slow.set_method_config(MethodConfig::with_timeout(Duration::from_secs(5)));
        let mut nested = slow.group("/nested", chain![]);

        slow.get("/report", many(1));
        nested.get("/export", many(1));

        let timeout = |p: &str| engine.shared().method_config(p).map(|c| c.timeout);
        assert_eq!(timeout("/slow/report"), Some(Duration::from_secs(5)));
        assert_eq!(timeout("/slow/nested/export"), Some(Duration::from_secs(5)));
    }

    // ── registration errors ───────────────────────────────────────────────────

    #[test]
    fn oversized_chain_leaves_the_table_unchanged() {
        let mut engine = Engine::new();
        engine.use_fn(many(60));

        let result = catch_unwind(AssertUnwindSafe(|| {
            engine.get("/big", many(3));
        }));

        assert!(result.is_err());
        assert!(engine.routes().is_empty());

        engine.get("/fits", many(2));
        assert_eq!(chain_len(&engine, "/fits"), 62);
    }

    #[test]
    #[should_panic(expected = "must begin with '/'")]
    fn relative_route_path_panics() {
        Engine::new().get("users", many(1));
    }

    #[test]
    #[should_panic(expected = "has no handler")]
    fn route_without_handler_panics() {
        Engine::new().get("/users", chain![]);
    }

    #[test]
    #[should_panic(expected = "is not valid")]
    fn lowercase_method_panics() {
        Engine::new().handle("get", "/users", many(1));
    }

    #[test]
    #[should_panic(expected = "already registered")]
    fn duplicate_path_panics() {
        let mut engine = Engine::new();
        engine.get("/users", many(1));
        engine.post("/users", many(1));
    }

    // ── use_handler ───────────────────────────────────────────────────────────

    struct Teapot;

    impl Handler for Teapot {
        fn serve<'a>(&'a self, c: &'a mut Context) -> crate::BoxFuture<'a> {
            Box::pin(async move { c.abort_with_status(StatusCode::IM_A_TEAPOT) })
        }
    }

    #[test]
    fn use_handler_appends_a_value_handler() {
        let mut engine = Engine::new();
        engine.use_handler(Teapot).get("/brew", many(1));

        assert_eq!(chain_len(&engine, "/brew"), 2);
    }
}
