use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::State,
    http::HeaderValue,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use once_cell::sync::{Lazy, OnceCell};
use prometheus::{Encoder, Registry, TextEncoder};
use timegate_clock::metrics as clock_metrics;
use timegate_process::metrics as process_metrics;
use timegate_scheduler::metrics as scheduler_metrics;
use tokio::{net::TcpListener, task::JoinHandle};
use tracing::{error, info};

static GLOBAL_REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);
static REGISTER_ONCE: OnceCell<()> = OnceCell::new();

pub fn register_metrics() {
    REGISTER_ONCE.get_or_init(|| {
        let registry = global_registry();
        clock_metrics::register_metrics(registry);
        scheduler_metrics::register_metrics(registry);
        process_metrics::register_metrics(registry);
    });
}

pub fn spawn_metrics_server(port: u16) -> Option<JoinHandle<()>> {
    if port == 0 {
        return None;
    }

    register_metrics();
    let registry = Arc::new(global_registry().clone());
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(registry);

    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    info!(%addr, "metrics server listening");
    Some(tokio::spawn(async move {
        match TcpListener::bind(addr).await {
            Ok(listener) => {
                if let Err(err) = axum::serve(listener, app.into_make_service()).await {
                    error!(?err, "metrics server exited with error");
                }
            }
            Err(err) => {
                error!(?err, "failed to bind metrics listener");
            }
        }
    }))
}

/// Text exposition of every registered collector.
pub fn render(registry: &Registry) -> Result<(String, String), prometheus::Error> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&registry.gather(), &mut buffer)?;
    let body = String::from_utf8(buffer)
        .map_err(|err| prometheus::Error::Msg(format!("metrics are not utf8: {err}")))?;
    Ok((encoder.format_type().to_string(), body))
}

async fn metrics_handler(State(registry): State<Arc<Registry>>) -> Response {
    let (format_type, body) = match render(&registry) {
        Ok(rendered) => rendered,
        Err(err) => {
            error!(?err, "failed to encode prometheus metrics");
            return (
                axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                "metric encode error",
            )
                .into_response();
        }
    };

    match HeaderValue::from_str(&format_type) {
        Ok(value) => ([(axum::http::header::CONTENT_TYPE, value)], body).into_response(),
        Err(err) => {
            error!(?err, "failed to build content-type header");
            (
                axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                "metric encode error",
            )
                .into_response()
        }
    }
}

pub fn global_registry() -> &'static Registry {
    &GLOBAL_REGISTRY
}
