//! Listener lifecycle and graceful shutdown.
//!
//! [`Engine::start`] binds the configured address and returns as soon as the
//! listener exists; bind failures come back from that call. The accept loop
//! runs on its own task until [`Engine::shutdown`] is called.
//!
//! Shutdown:
//! 1. Stops `listener.accept()`; no new connections are made.
//! 2. Asks every open connection to finish its in-flight request and close.
//! 3. Waits for them, bounded by the caller's [`Scope`]. If the scope
//!    finishes first the remaining connections are aborted and
//!    [`Error::Shutdown`] is returned.
//!
//! [`Engine::run`] does all of this around SIGTERM / Ctrl-C.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::StatusCode;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::TcpListener;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::ServerConfig;
use crate::engine::{Engine, Shared};
use crate::error::{Error, Result};
use crate::response::ResponseWriter;
use crate::scope::{Scope, ScopeError};

/// A started listener.
pub(crate) struct Running {
    token: CancellationToken,
    task: JoinHandle<()>,
    addr: SocketAddr,
}

impl Engine {
    /// Binds the configured address and starts serving in the background.
    ///
    /// Returns the bound address, which is where to look when the config
    /// asked for port `0`.
    pub async fn start(&self) -> Result<SocketAddr> {
        let shared = Arc::clone(self.shared());
        if shared.server.lock().is_some() {
            return Err(Error::AlreadyRunning);
        }

        let conf = shared.config();
        let addr = resolve_address(&conf).await?;
        let listener = TcpListener::bind(addr).await.map_err(|source| Error::Bind {
            network: conf.network.clone(),
            addr,
            source,
        })?;
        let addr = listener.local_addr()?;

        let token = CancellationToken::new();
        let task = tokio::spawn(accept_loop(
            Arc::clone(&shared),
            listener,
            token.clone(),
            conf.read_timeout,
            conf.write_timeout,
        ));

        let mut server = shared.server.lock();
        if server.is_some() {
            token.cancel();
            return Err(Error::AlreadyRunning);
        }
        *server = Some(Running { token, task, addr });

        info!(network = %conf.network, addr = %addr, "mochi listening");
        Ok(addr)
    }

    /// Starts, then blocks until SIGTERM or Ctrl-C and shuts down gracefully.
    pub async fn run(&self) -> Result<()> {
        self.start().await?;
        shutdown_signal().await;
        info!("shutdown signal received");
        self.shutdown(&Scope::background()).await
    }

    /// Stops accepting, lets open connections finish their current request,
    /// and waits for them until `scope` is done.
    pub async fn shutdown(&self, scope: &Scope) -> Result<()> {
        let Some(Running { token, mut task, addr }) = self.shared().server.lock().take() else {
            return Err(Error::NoServer);
        };
        token.cancel();

        tokio::select! {
            res = &mut task => {
                if let Err(e) = res {
                    error!(addr = %addr, "accept loop failed: {e}");
                }
                info!(addr = %addr, "mochi stopped");
                Ok(())
            }
            () = scope.done() => {
                task.abort();
                let cause = scope.error().unwrap_or(ScopeError::Cancelled);
                warn!(addr = %addr, "shutdown interrupted ({cause}), connections aborted");
                Err(Error::Shutdown(cause))
            }
        }
    }

    /// The address the running listener is bound to.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.shared().server.lock().as_ref().map(|r| r.addr)
    }
}

// ── Accept loop ───────────────────────────────────────────────────────────────

async fn accept_loop(
    shared: Arc<Shared>,
    listener: TcpListener,
    token: CancellationToken,
    read_timeout: Duration,
    write_timeout: Duration,
) {
    let mut tasks = JoinSet::new();

    loop {
        tokio::select! {
            biased;

            () = token.cancelled() => {
                info!(in_flight = tasks.len(), "draining connections");
                break;
            }

            res = listener.accept() => {
                let (stream, peer) = match res {
                    Ok(v) => v,
                    Err(e) => {
                        error!("accept error: {e}");
                        continue;
                    }
                };

                let shared = Arc::clone(&shared);
                let token = token.clone();
                let io = TokioIo::new(stream);

                tasks.spawn(async move {
                    let svc = service_fn(move |req: hyper::Request<Incoming>| {
                        let shared = Arc::clone(&shared);
                        async move {
                            Ok::<_, Infallible>(dispatch(&shared, req, peer, write_timeout).await)
                        }
                    });

                    let mut builder = ConnBuilder::new(TokioExecutor::new());
                    if !read_timeout.is_zero() {
                        builder.http1().timer(TokioTimer::new()).header_read_timeout(read_timeout);
                    }
                    let conn = builder.serve_connection(io, svc);
                    tokio::pin!(conn);

                    let res = tokio::select! {
                        res = conn.as_mut() => res,
                        () = token.cancelled() => {
                            conn.as_mut().graceful_shutdown();
                            conn.as_mut().await
                        }
                    };
                    if let Err(e) = res {
                        error!(peer = %peer, "connection error: {e}");
                    }
                });
            }

            Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
        }
    }

    while tasks.join_next().await.is_some() {}
}

/// Runs the engine's bootstrap, bounded by the write timeout when one is set.
async fn dispatch(
    shared: &Shared,
    req: hyper::Request<Incoming>,
    peer: SocketAddr,
    write_timeout: Duration,
) -> http::Response<Full<Bytes>> {
    if write_timeout.is_zero() {
        return shared.serve_http(req, peer).await;
    }
    match tokio::time::timeout(write_timeout, shared.serve_http(req, peer)).await {
        Ok(res) => res,
        Err(_) => {
            warn!(peer = %peer, timeout = ?write_timeout, "request exceeded write timeout");
            let mut w = ResponseWriter::new();
            w.error(StatusCode::SERVICE_UNAVAILABLE);
            w.into_response()
        }
    }
}

// ── Address resolution ────────────────────────────────────────────────────────

/// `:port` binds every interface of the network's family; an empty address
/// falls back to `$PORT`, then `:8080`.
async fn resolve_address(conf: &ServerConfig) -> Result<SocketAddr> {
    let address = match conf.address.as_str() {
        "" => match std::env::var("PORT") {
            Ok(port) if !port.is_empty() => format!(":{port}"),
            _ => ":8080".to_owned(),
        },
        other => other.to_owned(),
    };
    let address = match address.strip_prefix(':') {
        Some(port) if conf.network == "tcp6" => format!("[::]:{port}"),
        Some(port) => format!("0.0.0.0:{port}"),
        None => address,
    };

    let wants = |a: &SocketAddr| match conf.network.as_str() {
        "tcp4" => a.is_ipv4(),
        "tcp6" => a.is_ipv6(),
        _ => true,
    };
    tokio::net::lookup_host(&address)
        .await
        .map_err(|e| Error::Resolve(format!("{address}: {e}")))?
        .find(wants)
        .ok_or_else(|| Error::Resolve(format!("{address}: no {} address", conf.network)))
}

// ── Shutdown signal ───────────────────────────────────────────────────────────

/// Resolves on the first SIGTERM or Ctrl-C. Only Ctrl-C off Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let sigterm = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c   => {}
        () = sigterm  => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conf(network: &str, address: &str) -> ServerConfig {
        ServerConfig { network: network.to_owned(), address: address.to_owned(), ..Default::default() }
    }

    #[tokio::test]
    async fn colon_port_binds_all_interfaces() {
        let addr = resolve_address(&conf("tcp", ":9001")).await.unwrap();
        assert_eq!(addr, "0.0.0.0:9001".parse().unwrap());

        let addr = resolve_address(&conf("tcp6", ":9001")).await.unwrap();
        assert_eq!(addr, "[::]:9001".parse().unwrap());
    }

    #[tokio::test]
    async fn family_filter_rejects_mismatched_literal() {
        let err = resolve_address(&conf("tcp6", "127.0.0.1:9001")).await.unwrap_err();
        assert!(matches!(err, Error::Resolve(_)));
    }

    #[tokio::test]
    async fn shutdown_without_server_is_an_error() {
        let engine = Engine::new();
        assert!(matches!(engine.shutdown(&Scope::background()).await, Err(Error::NoServer)));
    }

    #[tokio::test]
    async fn start_twice_is_rejected() {
        let engine = Engine::with_config(conf("tcp4", "127.0.0.1:0")).unwrap();
        let addr = engine.start().await.unwrap();

        assert_eq!(engine.local_addr(), Some(addr));
        assert!(matches!(engine.start().await, Err(Error::AlreadyRunning)));

        engine.shutdown(&Scope::background()).await.unwrap();
        assert_eq!(engine.local_addr(), None);
    }
}
