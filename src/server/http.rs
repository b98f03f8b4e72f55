//! HTTP server implementation
//!
//! hyper http1 with TokioIo for async handling; manual method/path routing.
//! The server owns the shared session slot and the read cache; route
//! handlers never talk to the vendor service directly.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request};
use hyper_util::rt::TokioIo;
use serde_json::Value;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::awl::{AwlClient, LoginPayload, SharedClient};
use crate::cache::TimedCache;
use crate::config::Args;
use crate::routes::{self, not_found, RouteResponse};
use crate::types::{AwlError, Result};

/// Shared application state
pub struct AppState {
    pub args: Args,
    /// Current AWL session; `None` while the supervisor is reconnecting
    pub client: SharedClient,
    /// Memoizes the per-gateway read, keyed by gwid
    pub read_cache: TimedCache<String, Value>,
    pub started: Instant,
}

impl AppState {
    pub fn new(args: Args, client: SharedClient) -> Self {
        let read_cache = TimedCache::new(args.cache_window());
        Self {
            args,
            client,
            read_cache,
            started: Instant::now(),
        }
    }

    /// Current session, or `NotConnected` while the supervisor rebuilds it
    pub async fn current_client(&self) -> Result<Arc<AwlClient>> {
        self.client
            .read()
            .await
            .as_ref()
            .map(Arc::clone)
            .ok_or(AwlError::NotConnected)
    }

    /// Login payload snapshot for the listing endpoints
    pub async fn login_payload(&self) -> Result<LoginPayload> {
        self.current_client()
            .await?
            .login_payload()
            .ok_or(AwlError::NotConnected)
    }

    /// Cached gateway read; at most one upstream `read` per gwid per window
    pub async fn read_gateway(&self, gwid: &str) -> Result<Value> {
        self.read_cache
            .get_or_fetch(gwid.to_string(), || async {
                self.current_client().await?.read(gwid, 0).await
            })
            .await
    }
}

/// Run the HTTP server until shutdown is signalled.
pub async fn run(state: Arc<AppState>, shutdown: impl std::future::Future<Output = ()>) -> Result<()> {
    let addr: SocketAddr = state.args.listen;
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| AwlError::Internal(format!("could not bind {addr}: {e}")))?;
    info!("listening on http://{}", addr);

    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("shutdown requested; stopping HTTP server");
                return Ok(());
            }
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!("accept failed: {e}");
                        continue;
                    }
                };
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);
                    let service = service_fn(move |req| {
                        let state = Arc::clone(&state);
                        async move { Ok::<_, hyper::Error>(route(state, req).await) }
                    });
                    if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                        debug!("connection from {} ended: {e}", peer);
                    }
                });
            }
        }
    }
}

/// Dispatch one request.
async fn route(state: Arc<AppState>, req: Request<Incoming>) -> RouteResponse {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let raw = req
        .uri()
        .query()
        .is_some_and(|q| q.split('&').any(|p| p == "raw" || p.starts_with("raw=")));
    debug!("{} {}", method, path);

    let segments: Vec<&str> = path
        .trim_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
        .collect();

    if method != Method::GET {
        return routes::error_response(
            hyper::StatusCode::METHOD_NOT_ALLOWED,
            "only GET is supported",
        );
    }

    match segments.as_slice() {
        ["health"] => routes::health::health(&state).await,
        ["gateways"] => routes::gateways::list_gateways(&state, raw).await,
        ["zones"] => routes::gateways::list_zones(&state).await,
        ["gateways", gwid] => routes::gateways::read_gateway(&state, gwid).await,
        ["gateways", gwid, "zones"] => routes::gateways::gateway_zones(&state, gwid).await,
        ["gateways", gwid, "zones", zoneid] => match zoneid.parse::<u32>() {
            Ok(zoneid) => routes::gateways::gateway_zone(&state, gwid, zoneid).await,
            Err(_) => not_found(),
        },
        ["gateways", gwid, "zones", zoneid, "details"] => match zoneid.parse::<u32>() {
            Ok(zoneid) => routes::gateways::zone_details(&state, gwid, zoneid).await,
            Err(_) => not_found(),
        },
        _ => not_found(),
    }
}
