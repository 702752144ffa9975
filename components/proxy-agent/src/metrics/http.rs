// External crates
use bytes::Bytes;
use http_body_util::Full;
use hyper::{
    body::Incoming,
    header::CONTENT_TYPE,
    http::{Method, Request, Response, StatusCode},
    service::service_fn,
};
use hyper_util::{rt::TokioExecutor, server::conn::auto::Builder as HyperServerBuilder};
use prometheus::{Encoder, TextEncoder};
use std::{convert::Infallible, net::SocketAddr};
use tokio::net::TcpListener;
use tracing::{debug, error};

async fn metrics_handler(_req: Request<Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
    // Gather all registered metrics
    let metric_families = prometheus::gather();

    // Encode into Prometheus text format
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %e, "Failed to encode prometheus metrics");
    }

    let mut response = Response::new(Full::new(Bytes::from(buffer)));
    if let Ok(content_type) = encoder.format_type().parse() {
        response.headers_mut().insert(CONTENT_TYPE, content_type);
    }
    Ok(response)
}

/// Serve the Prometheus `/metrics` endpoint until the process exits.
pub async fn start_metrics_server(addr: &str) -> anyhow::Result<()> {
    let addr: SocketAddr = addr.parse()?;
    let listener = TcpListener::bind(addr).await?;

    debug!(
        metrics_endpoint = %addr,
        "Proxy agent metrics available at http://{addr}/metrics"
    );

    loop {
        let (stream, _) = listener.accept().await?;

        let io = hyper_util::rt::TokioIo::new(stream);
        let service = service_fn(|req: Request<Incoming>| async move {
            match (req.method(), req.uri().path()) {
                (&Method::GET, "/metrics") => metrics_handler(req).await,
                _ => {
                    let mut not_found =
                        Response::new(Full::new(Bytes::from_static(b"Not Found")));
                    *not_found.status_mut() = StatusCode::NOT_FOUND;
                    Ok(not_found)
                }
            }
        });

        // Spawn a task to handle the connection
        tokio::spawn(async move {
            if let Err(err) = HyperServerBuilder::new(TokioExecutor::new())
                .serve_connection(io, service)
                .await
            {
                error!(
                    error = %err,
                    "Metrics server error"
                );
            }
        });
    }
}
