use std::future::ready;
use std::sync::Arc;

use axum::{routing, Router};
use loader_core::Dispatcher;
use metrics_exporter_prometheus::PrometheusHandle;

use super::events;
use crate::metrics;

pub fn app(dispatcher: Arc<Dispatcher>, metrics: Option<PrometheusHandle>) -> Router {
    Router::new()
        .route("/", routing::get(index))
        .route("/_readiness", routing::get(index))
        .route("/_liveness", routing::get(|| ready("ok")))
        .route(
            "/metrics",
            routing::get(move || match metrics {
                Some(ref recorder_handle) => ready(recorder_handle.render()),
                None => ready("no metrics recorder installed".to_owned()),
            }),
        )
        .route("/events", routing::post(events::post).with_state(dispatcher))
        .layer(axum::middleware::from_fn(metrics::track_metrics))
}

pub async fn index() -> &'static str {
    "object loader worker"
}
