//! Prometheus gauges mirroring the per-flow counters, and the `/metrics` endpoint.
use axum::{Router, http::{StatusCode, header}, response::IntoResponse, routing::get};
use flow_plugin::MetricsSnapshot;
use once_cell::sync::Lazy;
use prometheus::{Encoder, IntGaugeVec, Opts, Registry, TextEncoder};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

struct FlowGauges {
    errors: IntGaugeVec,
    expired: IntGaugeVec,
    no_data: IntGaugeVec,
    received: IntGaugeVec,
    sent: IntGaugeVec,
    runs: IntGaugeVec,
}

fn gauge(name: &str, help: &str) -> IntGaugeVec {
    let vec = IntGaugeVec::new(Opts::new(name, help).namespace("feedflow"), &["flow"])
        .unwrap_or_else(|e| panic!("invalid metric {name}: {e}"));
    REGISTRY.register(Box::new(vec.clone())).ok();
    vec
}

static GAUGES: Lazy<FlowGauges> = Lazy::new(|| FlowGauges {
    errors: gauge("errors", "Errors in the last run"),
    expired: gauge("expired", "Expired sources seen in the last run"),
    no_data: gauge("no_data", "Whether the last run had nothing to send"),
    received: gauge("received", "Records received in the last run"),
    sent: gauge("sent", "Records sent in the last run"),
    runs: gauge("runs", "Runs since start"),
});

/// Publishes the end-of-run counters of one flow.
pub fn publish(flow: &str, snapshot: &MetricsSnapshot) {
    let g = &*GAUGES;
    let labels = [flow];
    g.errors.with_label_values(&labels).set(snapshot.errors as i64);
    g.expired.with_label_values(&labels).set(snapshot.expired as i64);
    g.no_data.with_label_values(&labels).set(snapshot.no_data as i64);
    g.received.with_label_values(&labels).set(snapshot.received as i64);
    g.sent.with_label_values(&labels).set(snapshot.sent as i64);
    g.runs.with_label_values(&labels).set(snapshot.runs as i64);
}

/// Text exposition of everything registered.
pub fn gather_text() -> Result<String, prometheus::Error> {
    Lazy::force(&GAUGES);
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&REGISTRY.gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

async fn metrics_handler() -> impl IntoResponse {
    match gather_text() {
        Ok(body) => (StatusCode::OK, [(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body).into_response(),
        Err(e) => {
            error!(error = %e, "metrics encoding failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub fn router() -> Router {
    Router::new().route("/metrics", get(metrics_handler))
}

/// Binds the exporter address. Failing here is fatal to the process.
pub async fn bind(listen: &str) -> std::io::Result<TcpListener> {
    TcpListener::bind(listen).await
}

/// Serves `/metrics` until `shutdown` is cancelled.
pub async fn serve(listener: TcpListener, shutdown: CancellationToken) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "metrics exporter listening");
    }
    axum::serve(listener, router())
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publishes_labelled_gauges() {
        let snapshot = MetricsSnapshot { errors: 1, received: 3, sent: 2, runs: 7, ..Default::default() };
        publish("metrics-test", &snapshot);
        let text = gather_text().unwrap();
        assert!(text.contains("feedflow_received{flow=\"metrics-test\"} 3"));
        assert!(text.contains("feedflow_runs{flow=\"metrics-test\"} 7"));
        assert!(text.contains("feedflow_no_data{flow=\"metrics-test\"} 0"));
    }

    #[tokio::test]
    async fn serves_and_stops() {
        publish("serve-test", &MetricsSnapshot::default());
        let listener = bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let token = CancellationToken::new();
        let server = tokio::spawn(serve(listener, token.clone()));

        let body = reqwest::get(format!("http://{addr}/metrics")).await.unwrap().text().await.unwrap();
        assert!(body.contains("feedflow_"));

        token.cancel();
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn second_bind_fails() {
        let first = bind("127.0.0.1:0").await.unwrap();
        let addr = first.local_addr().unwrap().to_string();
        assert!(bind(&addr).await.is_err());
    }
}
