//! ---
//! exu_section: "01-core-functionality"
//! exu_subsection: "binary"
//! exu_type: "source"
//! exu_scope: "code"
//! exu_description: "Prometheus scrape endpoint for the extension update daemon."
//! exu_version: "v0.1.0"
//! exu_owner: "tbd"
//! ---
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use prometheus::{Registry, TextEncoder};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Serve `registry` at `GET /metrics` on `addr`.
pub fn spawn_http_server(registry: Arc<Registry>, addr: SocketAddr) -> Result<MetricsServer> {
    let app = Router::new().route(
        "/metrics",
        get(move || metrics_handler(registry.clone())),
    );

    let std_listener = StdTcpListener::bind(addr)
        .with_context(|| format!("failed to bind metrics listener {addr}"))?;
    std_listener
        .set_nonblocking(true)
        .context("failed to configure metrics listener as non-blocking")?;
    let addr = std_listener
        .local_addr()
        .context("metrics listener has no local address")?;
    let listener = TcpListener::from_std(std_listener)
        .context("failed to convert std listener into tokio listener")?;

    info!(address = %addr, "metrics server starting");

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let task: JoinHandle<Result<()>> = tokio::spawn(async move {
        axum::serve(listener, app.into_make_service())
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
            .context("metrics server encountered an error")?;
        Ok(())
    });

    Ok(MetricsServer {
        addr,
        shutdown: Some(shutdown_tx),
        task,
    })
}

async fn metrics_handler(registry: Arc<Registry>) -> impl IntoResponse {
    let encoder = TextEncoder::new();
    match encoder.encode_to_string(&registry.gather()) {
        Ok(body) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static(prometheus::TEXT_FORMAT),
            )],
            body,
        )
            .into_response(),
        Err(err) => {
            error!(error = %err, "failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                String::from("metrics encoding error"),
            )
                .into_response()
        }
    }
}

/// Handle to the running exporter.
#[derive(Debug)]
pub struct MetricsServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl MetricsServer {
    /// Address actually bound, resolving port `0`.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Signal shutdown and wait for the server task.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.task.await {
            Ok(result) => result,
            Err(join_err) => Err(anyhow::Error::new(join_err)),
        }
    }
}
