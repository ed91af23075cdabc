use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use prometheus_client::encoding::text::encode;
use prometheus_client::registry::Registry;

pub struct HealthState {
    pub registry: Arc<Registry>,
    /// One flag per informer, raised once its initial list is delivered.
    pub synced: Vec<Arc<AtomicBool>>,
}

pub type SharedHealthState = Arc<HealthState>;

pub async fn healthz() -> &'static str {
    "ok"
}

pub async fn readyz(State(state): State<SharedHealthState>) -> impl IntoResponse {
    if state.synced.iter().all(|s| s.load(Ordering::Relaxed)) {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "informers not synced")
    }
}

pub async fn metrics_handler(State(state): State<SharedHealthState>) -> impl IntoResponse {
    let mut buffer = String::new();
    if let Err(e) = encode(&mut buffer, &state.registry) {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to encode metrics: {e}"),
        )
            .into_response();
    }
    (
        [(
            header::CONTENT_TYPE,
            "application/openmetrics-text; version=1.0.0; charset=utf-8",
        )],
        buffer,
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use axum::body::to_bytes;

    use super::*;
    use crate::config::MetricsConfig;
    use crate::metrics::{KyvernoMetrics, MetricsSink, PolicyChangesLabels};

    fn state(synced: &[bool]) -> SharedHealthState {
        let mut registry = Registry::default();
        let metrics = KyvernoMetrics::new(&mut registry, MetricsConfig::default());
        metrics.record_policy_changes(PolicyChangesLabels {
            policy_validation_mode: "audit",
            policy_type: "cluster",
            policy_background_mode: "true",
            policy_namespace: "-".to_string(),
            policy_name: "require-labels".to_string(),
            policy_change_type: "created",
        });
        Arc::new(HealthState {
            registry: Arc::new(registry),
            synced: synced.iter().map(|s| Arc::new(AtomicBool::new(*s))).collect(),
        })
    }

    #[tokio::test]
    async fn test_readyz_requires_all_informers() {
        let resp = readyz(State(state(&[true, false]))).await.into_response();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);

        let resp = readyz(State(state(&[true, true]))).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_metrics_handler_encodes_registry() {
        let resp = metrics_handler(State(state(&[true]))).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let body = String::from_utf8(body.to_vec()).unwrap();
        assert!(body.contains("kyverno_policy_changes_total{"));
        assert!(body.ends_with("# EOF\n"));
    }
}
