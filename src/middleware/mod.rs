//! Built-in middleware.
//!
//! Both wrap the rest of the chain, so register them first:
//!
//! ```rust
//! use mochi::{middleware, Engine, Routes};
//!
//! let mut engine = Engine::new();
//! engine.use_handler(middleware::recovery()).use_handler(middleware::logger());
//! ```

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::Instant;

use futures_util::FutureExt;
use http::StatusCode;
use tracing::{error, info};

use crate::context::Context;
use crate::handler::{BoxFuture, Handler};
use crate::metadata::{self, keys};

/// Access log: one `info` event per request, after the chain has run.
pub fn logger() -> Logger {
    Logger
}

/// Catches a panicking handler, logs it, answers `500` unless a status was
/// already written, and aborts the chain.
pub fn recovery() -> Recovery {
    Recovery
}

#[derive(Clone, Copy, Debug, Default)]
pub struct Logger;

impl Handler for Logger {
    fn serve<'a>(&'a self, c: &'a mut Context) -> BoxFuture<'a> {
        Box::pin(async move {
            let start = Instant::now();
            c.next().await;

            let req = c.request();
            info!(
                method = %req.method(),
                path = req.path(),
                status = c.writer().status().as_u16(),
                latency_ms = start.elapsed().as_secs_f64() * 1000.0,
                caller = %metadata::string(c.scope(), keys::CALLER),
                remote_ip = %metadata::string(c.scope(), keys::REMOTE_IP),
                error = c.error().map(tracing::field::display),
                "request",
            );
        })
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct Recovery;

impl Handler for Recovery {
    fn serve<'a>(&'a self, c: &'a mut Context) -> BoxFuture<'a> {
        Box::pin(async move {
            let Err(panic) = AssertUnwindSafe(c.next()).catch_unwind().await else {
                return;
            };
            error!(
                method = %c.request().method(),
                path = c.request().path(),
                panic = panic_message(panic.as_ref()),
                "handler panicked",
            );
            if !c.writer().written() {
                c.writer_mut().error(StatusCode::INTERNAL_SERVER_ERROR);
            }
            c.abort();
        })
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use http_body_util::{BodyExt, Empty};

    use crate::{Engine, Routes, chain};

    use super::*;

    async fn get(engine: &Engine, path: &str) -> (StatusCode, Bytes) {
        let req = http::Request::get(path).body(Empty::<Bytes>::new()).unwrap();
        let res = engine.serve_http(req, "127.0.0.1:1".parse().unwrap()).await;
        let status = res.status();
        (status, res.into_body().collect().await.unwrap().to_bytes())
    }

    fn boom(_c: &mut Context) -> BoxFuture<'_> {
        Box::pin(async { panic!("boom") })
    }

    fn ok(c: &mut Context) -> BoxFuture<'_> {
        Box::pin(async move { c.string(StatusCode::OK, "fine") })
    }

    #[tokio::test]
    async fn recovery_turns_a_panic_into_500() {
        let mut engine = Engine::new();
        engine.use_handler(recovery()).use_handler(logger());
        engine.get("/boom", chain![boom]);

        let (status, body) = get(&engine, "/boom").await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(&body[..], b"Internal Server Error\n");
    }

    #[tokio::test]
    async fn recovery_keeps_an_already_written_status() {
        let mut engine = Engine::new();
        engine.use_handler(recovery());
        engine.get("/late", chain![|c: &mut Context| Box::pin(async move {
            c.status(StatusCode::ACCEPTED);
            panic!("after status");
        })]);

        let (status, _) = get(&engine, "/late").await;

        assert_eq!(status, StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn logger_passes_the_response_through() {
        let mut engine = Engine::new();
        engine.use_handler(logger());
        engine.get("/ok", chain![ok]);

        let (status, body) = get(&engine, "/ok").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(&body[..], b"fine");
    }

    #[test]
    fn panic_payloads_are_readable() {
        assert_eq!(panic_message(&"static"), "static");
        assert_eq!(panic_message(&String::from("owned")), "owned");
        assert_eq!(panic_message(&42u8), "non-string panic payload");
    }
}
