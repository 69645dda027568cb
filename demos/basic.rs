//! Minimal mochi example: grouped middleware, an injection, a background task.
//!
//! Run with:
//!   cargo run --example basic
//!
//! Try:
//!   curl http://localhost:9090/internal/test
//!   curl http://localhost:9090/external/test -H 'x-mochi-user: billing'
//!   curl http://localhost:9090/external/test -H 'x-mochi-timeout: 15'
//!   curl -X POST http://localhost:9090/internal/test        → 405
//!   curl http://localhost:9090/monitor/ping

use std::time::{Duration, Instant};

use mochi::metadata::{self, keys};
use mochi::{
    BoxFuture, Context, Engine, MethodConfig, Routes, ServerConfig, StatusCode, chain, health,
    middleware,
};
use tracing::info;

#[tokio::main]
async fn main() -> mochi::Result<()> {
    tracing_subscriber::fmt::init();

    let conf = ServerConfig { address: ":9090".to_owned(), ..Default::default() };
    let mut engine = Engine::with_config(conf)?;

    engine.use_handler(middleware::recovery()).use_fn(chain![timing]);

    // Spliced in front of every route registered below.
    engine.inject("^/(internal|external)/", chain![|c: &mut Context| Box::pin(async move {
        info!(path = c.request().path(), "injected");
    })]);

    let mut internal = engine.group("/internal", chain![|c: &mut Context| Box::pin(async move {
        info!(remote_ip = %metadata::string(c.scope(), keys::REMOTE_IP), "internal");
    })]);
    internal.set_method_config(MethodConfig::with_timeout(Duration::from_secs(5)));
    internal.get("/test", chain![internal_test]);

    let mut external = engine.group("/external", chain![]);
    external.get("/test", chain![external_test]);

    engine.ping(chain![health::ping]);

    for (method, path) in engine.routes() {
        info!(%method, path, "route");
    }

    engine.run().await
}

fn timing(c: &mut Context) -> BoxFuture<'_> {
    Box::pin(async move {
        let start = Instant::now();
        c.set("log_id", 123u64);
        c.next().await;
        info!(cost = ?start.elapsed(), status = c.writer().status().as_u16(), "done");
    })
}

fn internal_test(c: &mut Context) -> BoxFuture<'_> {
    Box::pin(async move {
        let log_id = c.get_as::<u64>("log_id").copied().unwrap_or_default();
        c.string(StatusCode::OK, format!("hello world!, logid={log_id}"));
    })
}

fn external_test(c: &mut Context) -> BoxFuture<'_> {
    Box::pin(async move {
        let caller = metadata::string(c.scope(), keys::CALLER);
        let budget = metadata::int64(c.scope(), keys::TIMEOUT);

        // Audit outlives the request, so it runs on a detached scope.
        let scope = metadata::detach(c.scope());
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            info!(caller = %metadata::string(&scope, keys::CALLER), "audit written");
        });

        let log_id = c.get_as::<u64>("log_id").copied().unwrap_or_default();
        c.json(0, "success", format!("hello {caller}!, logid={log_id}, budget={budget}ms"));
    })
}
