//! Health-check handlers.
//!
//! Load balancers and service discovery poll `GET /monitor/ping`. Register
//! the default answer with [`Engine::ping`](crate::Engine::ping):
//!
//! ```rust
//! use mochi::{chain, health, Engine};
//!
//! let mut engine = Engine::new();
//! engine.ping(chain![health::ping]);
//! ```
//!
//! Put your own handler in front of it if readiness depends on something
//! else, a database pool for instance, and abort with `503` while it is down.

use http::StatusCode;

use crate::context::Context;
use crate::handler::BoxFuture;

/// Answers `200 OK` with body `pong`.
pub fn ping(c: &mut Context) -> BoxFuture<'_> {
    Box::pin(async move { c.string(StatusCode::OK, "pong") })
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use http_body_util::{BodyExt, Empty};

    use crate::{Engine, chain};

    #[tokio::test]
    async fn ping_answers_pong() {
        let mut engine = Engine::new();
        engine.ping(chain![super::ping]);

        let req = http::Request::get("/monitor/ping").body(Empty::<Bytes>::new()).unwrap();
        let res = engine.serve_http(req, "127.0.0.1:1".parse().unwrap()).await;

        assert_eq!(res.status(), http::StatusCode::OK);
        assert_eq!(&res.into_body().collect().await.unwrap().to_bytes()[..], b"pong");
    }
}
