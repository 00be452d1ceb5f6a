//! Operational HTTP endpoints

use anyhow::Result;
use http_body_util::Full;
use hyper::{
    body::Bytes,
    header::{HeaderValue, CONTENT_TYPE},
    server::conn::http1,
    service::service_fn,
    Method, Request, Response, StatusCode,
};
use hyper_util::rt::tokio::TokioIo;
use router_core::{CoreError, QueryOptions, Router, Status};
use tokio::net::TcpListener;
use tracing::{debug, warn};

/// Accept HTTP connections until the listener fails
pub async fn serve(listener: TcpListener, router: Router) -> Result<()> {
    loop {
        let (stream, peer_addr) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let router = router.clone();

        tokio::task::spawn(async move {
            let service = service_fn(move |req| {
                let router = router.clone();
                handle_request(req, router)
            });

            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                debug!("Error serving HTTP connection from {}: {}", peer_addr, e);
            }
        });
    }
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    router: Router,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    debug!("{} {}", req.method(), req.uri().path());
    Ok(route_request(req.method(), req.uri().path(), req.uri().query(), &router).await)
}

async fn route_request(
    method: &Method,
    path: &str,
    query: Option<&str>,
    router: &Router,
) -> Response<Full<Bytes>> {
    if *method != Method::GET {
        return respond(StatusCode::METHOD_NOT_ALLOWED, "text/plain", "Method Not Allowed\n");
    }

    match path {
        "/metrics" => match router.metrics().gather() {
            Ok(text) => respond(StatusCode::OK, "text/plain; version=0.0.4", text),
            Err(e) => {
                warn!("Failed to gather metrics: {}", e);
                respond(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "text/plain",
                    "Failed to gather metrics\n",
                )
            }
        },
        "/healthz" => match router.status().await {
            Status::Stopped => respond(StatusCode::SERVICE_UNAVAILABLE, "text/plain", "stopped\n"),
            status => respond(StatusCode::OK, "text/plain", format!("OK {}\n", status)),
        },
        "/routes" => {
            let mut opts = QueryOptions::new();
            if let Some(service) = query_param(query, "service") {
                opts = opts.service(service);
            }

            match router.lookup(opts).await {
                Ok(routes) => match serde_json::to_vec(&routes) {
                    Ok(body) => respond(StatusCode::OK, "application/json", body),
                    Err(e) => {
                        warn!("Failed to encode routes: {}", e);
                        respond(StatusCode::INTERNAL_SERVER_ERROR, "text/plain", "Internal Server Error\n")
                    }
                },
                Err(CoreError::RouteNotFound) => respond(StatusCode::NOT_FOUND, "application/json", "[]"),
                Err(e) => {
                    warn!("Route lookup failed: {}", e);
                    respond(StatusCode::INTERNAL_SERVER_ERROR, "text/plain", "Internal Server Error\n")
                }
            }
        }
        _ => respond(StatusCode::NOT_FOUND, "text/plain", "Not Found\n"),
    }
}

fn respond(status: StatusCode, content_type: &'static str, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

// Percent-decoded value of the first `name` parameter, if non-empty
fn query_param(query: Option<&str>, name: &str) -> Option<String> {
    url::form_urlencoded::parse(query?.as_bytes())
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
        .filter(|value| !value.is_empty())
}
