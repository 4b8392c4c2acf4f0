//! Liveness endpoint. `GET /healthz` answers `200 OK` for as long as the
//! process serves requests.

use hyper::{
  service::{make_service_fn, service_fn},
  Body, Method, Request, Response, Server, StatusCode,
};
use std::{convert::Infallible, future::Future, net::SocketAddr};
use tracing::info;

pub const HEALTHZ_PATH: &str = "/healthz";

pub async fn handle(request: Request<Body>) -> Result<Response<Body>, Infallible> {
  let status = match (request.method(), request.uri().path()) {
    (&Method::GET, HEALTHZ_PATH) => StatusCode::OK,
    _ => StatusCode::NOT_FOUND,
  };

  let mut response = Response::new(Body::from(status.canonical_reason().unwrap_or_default()));
  *response.status_mut() = status;
  Ok(response)
}

/// Serve the liveness endpoint on `addr` until `shutdown` completes.
pub async fn serve(addr: SocketAddr, shutdown: impl Future<Output = ()>) -> hyper::Result<()> {
  let make_svc = make_service_fn(|_conn| async { Ok::<_, Infallible>(service_fn(handle)) });
  let server = Server::try_bind(&addr)?.serve(make_svc);
  info!(%addr, "serving liveness endpoint");

  server.with_graceful_shutdown(shutdown).await
}
