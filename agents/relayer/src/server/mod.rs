//! Intake API.
//!
//! Three JSON routes admit and expose relay jobs; a fourth serves
//! prometheus text. The intake never blocks on the poller or the
//! submitter: every handler suspends on store I/O only. A coarse per-IP
//! throttle and an allow-all CORS policy sit in front of all routes.

use std::collections::BTreeMap;
use std::net::SocketAddr;

use axum::extract::{Path, State};
use axum::http::{header::CONTENT_TYPE, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{middleware, Json, Router};
use chrono::{DateTime, Utc};
use derive_new::new;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use relay_base::server::{
    cors_layer, ip_rate_limiter, throttle_by_ip, ServerErrorResponse, ServerResult,
    ServerSuccessResponse,
};
use relay_base::{CoreMetrics, JobStore, StoreError};
use relay_core::{domain, utils, JobStatus, RelayJob, RelayOutcome};

/// Coarse per-client throttle on the intake surface.
const INTAKE_REQUESTS_PER_SECOND: u32 = 20;

/// Shared state behind every intake route.
#[derive(Clone, new)]
pub struct ServerState {
    store: JobStore,
    metrics: CoreMetrics,
}

impl ServerState {
    /// The intake router. Layer-free apart from CORS so tests can drive it
    /// with `oneshot`; the per-IP throttle is added in [`Self::serve`].
    pub fn router(self) -> Router {
        Router::new()
            .route("/relay", post(submit_job))
            .route("/relay/:tx_hash", get(query_job))
            .route("/health", get(health))
            .route("/metrics", get(metrics))
            .layer(cors_layer())
            .with_state(self)
    }

    /// Serve the intake API until `shutdown` fires.
    pub async fn serve(self, port: u16, shutdown: CancellationToken) -> eyre::Result<()> {
        let throttle = ip_rate_limiter(INTAKE_REQUESTS_PER_SECOND);
        let app = self
            .router()
            .layer(middleware::from_fn_with_state(throttle, throttle_by_ip));
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!(%addr, "intake API listening");
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitJobRequest {
    pub source_domain: u32,
    pub tx_hash: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitJobResponse {
    pub tx_hash: String,
    pub status: JobStatus,
    pub message: String,
}

/// The narrow projection `GET /relay/{txHash}` exposes. The attested
/// payload, decoded fields, and operational counters stay internal.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProjection {
    pub tx_hash: String,
    pub source_domain: u32,
    pub status: JobStatus,
    pub outcome: Option<RelayOutcome>,
    pub error: Option<String>,
    pub dest_tx_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub attested_at: Option<DateTime<Utc>>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub confirmed_at: Option<DateTime<Utc>>,
}

impl From<RelayJob> for JobProjection {
    fn from(job: RelayJob) -> Self {
        JobProjection {
            tx_hash: job.tx_hash,
            source_domain: job.source_domain,
            status: job.status,
            outcome: job.outcome,
            error: job.error_message,
            dest_tx_hash: job.dest_tx_hash,
            created_at: job.created_at,
            attested_at: job.attested_at,
            submitted_at: job.submitted_at,
            confirmed_at: job.confirmed_at,
        }
    }
}

fn store_error(e: StoreError) -> ServerErrorResponse {
    error!(error = %e, "store failure");
    ServerErrorResponse::new(StatusCode::INTERNAL_SERVER_ERROR, "store failure")
}

async fn submit_job(
    State(state): State<ServerState>,
    Json(payload): Json<SubmitJobRequest>,
) -> ServerResult<ServerSuccessResponse<SubmitJobResponse>> {
    if !domain::is_recognized_source(payload.source_domain) {
        return Err(ServerErrorResponse::new(
            StatusCode::BAD_REQUEST,
            format!("unsupported source domain {}", payload.source_domain),
        ));
    }
    let tx_hash = utils::normalize_tx_hash(&payload.tx_hash).ok_or_else(|| {
        ServerErrorResponse::new(
            StatusCode::BAD_REQUEST,
            "invalid txHash: expected 0x-prefixed 32-byte hex",
        )
    })?;

    if let Some(existing) = state.store.get(&tx_hash).await.map_err(store_error)? {
        return Ok(ServerSuccessResponse::new(SubmitJobResponse {
            tx_hash: existing.tx_hash,
            status: existing.status,
            message: "Job already exists".to_owned(),
        }));
    }

    let job = RelayJob::new_pending(tx_hash.clone(), payload.source_domain, Utc::now());
    match state.store.create(&job).await {
        Ok(()) => {
            info!(%tx_hash, source_domain = payload.source_domain, "relay job accepted");
            Ok(ServerSuccessResponse::created(SubmitJobResponse {
                tx_hash,
                status: JobStatus::Pending,
                message: "Relay job accepted".to_owned(),
            }))
        }
        // a concurrent intake won the insert; the replay contract still holds
        Err(StoreError::Duplicate) => {
            let existing = state
                .store
                .get(&tx_hash)
                .await
                .map_err(store_error)?
                .ok_or_else(|| {
                    ServerErrorResponse::new(StatusCode::INTERNAL_SERVER_ERROR, "store failure")
                })?;
            Ok(ServerSuccessResponse::new(SubmitJobResponse {
                tx_hash: existing.tx_hash,
                status: existing.status,
                message: "Job already exists".to_owned(),
            }))
        }
        Err(e) => Err(store_error(e)),
    }
}

async fn query_job(
    State(state): State<ServerState>,
    Path(tx_hash): Path<String>,
) -> ServerResult<ServerSuccessResponse<JobProjection>> {
    let tx_hash = utils::normalize_tx_hash(&tx_hash).ok_or_else(|| {
        ServerErrorResponse::new(
            StatusCode::BAD_REQUEST,
            "invalid txHash: expected 0x-prefixed 32-byte hex",
        )
    })?;
    let job = state
        .store
        .get(&tx_hash)
        .await
        .map_err(store_error)?
        .ok_or_else(|| ServerErrorResponse::new(StatusCode::NOT_FOUND, "Job not found"))?;
    Ok(ServerSuccessResponse::new(JobProjection::from(job)))
}

async fn health(State(state): State<ServerState>) -> Response {
    match state.store.count_by_status().await {
        Ok(counts) => {
            refresh_job_gauges(&state.metrics, &counts);
            let jobs: BTreeMap<&str, i64> =
                counts.iter().map(|(s, n)| (s.as_str(), *n)).collect();
            ServerSuccessResponse::new(serde_json::json!({
                "status": "healthy",
                "jobs": jobs,
            }))
            .into_response()
        }
        Err(e) => {
            error!(error = %e, "health check cannot reach store");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"status": "unhealthy"})),
            )
                .into_response()
        }
    }
}

async fn metrics(State(state): State<ServerState>) -> Response {
    if let Ok(counts) = state.store.count_by_status().await {
        refresh_job_gauges(&state.metrics, &counts);
    }
    match state.metrics.gather() {
        Ok(report) => Response::builder()
            .header(CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(axum::body::Body::from(report))
            .expect("Failed to build response"),
        Err(e) => {
            error!(error = %e, "failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn refresh_job_gauges(metrics: &CoreMetrics, counts: &BTreeMap<JobStatus, i64>) {
    for (status, count) in counts {
        metrics.set_job_count(*status, *count);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use axum::body::Body;
    use axum::http::{header::CONTENT_TYPE, Method, Request};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    async fn setup() -> (tempfile::TempDir, JobStore, Router) {
        let dir = tempfile::tempdir().unwrap();
        let store = JobStore::connect(&dir.path().join("relay.db")).await.unwrap();
        let state = ServerState::new(store.clone(), CoreMetrics::new().unwrap());
        (dir, store, state.router())
    }

    fn hash(n: u8) -> String {
        format!("0x{}", hex::encode([n; 32]))
    }

    async fn post_relay(app: Router, source_domain: u32, tx_hash: &str) -> Response {
        let body = serde_json::json!({"sourceDomain": source_domain, "txHash": tx_hash});
        let request = Request::builder()
            .uri("/relay")
            .method(Method::POST)
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        app.oneshot(request).await.unwrap()
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn submit_admits_a_pending_job() {
        let (_dir, store, app) = setup().await;
        let response = post_relay(app, 3, &hash(1)).await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = body_json(response).await;
        assert_eq!(body["txHash"], hash(1));
        assert_eq!(body["status"], "pending");

        let job = store.get(&hash(1)).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.source_domain, 3);
        assert_eq!(job.poll_attempts, 0);
    }

    #[tokio::test]
    async fn submit_lowercases_the_hash() {
        let (_dir, store, app) = setup().await;
        let upper = hash(0xab).to_uppercase().replace("0X", "0x");
        let response = post_relay(app, 3, &upper).await;
        assert_eq!(response.status(), StatusCode::CREATED);
        assert!(store.get(&hash(0xab)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn replay_returns_the_existing_row_unchanged() {
        let (_dir, store, app) = setup().await;
        let first = post_relay(app.clone(), 3, &hash(1)).await;
        assert_eq!(first.status(), StatusCode::CREATED);
        let before = store.get(&hash(1)).await.unwrap().unwrap();

        let second = post_relay(app, 3, &hash(1)).await;
        assert_eq!(second.status(), StatusCode::OK);
        let body = body_json(second).await;
        assert_eq!(body["message"], "Job already exists");

        let after = store.get(&hash(1)).await.unwrap().unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn unrecognized_domains_are_rejected() {
        let (_dir, store, app) = setup().await;
        // the destination's own domain is excluded from the allow-list
        let response = post_relay(app.clone(), 0, &hash(1)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert!(body["error"].as_str().unwrap().contains("source domain"));

        let response = post_relay(app, 99, &hash(1)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(store.get(&hash(1)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn malformed_hashes_are_rejected() {
        let (_dir, _store, app) = setup().await;
        for bad in ["", "0x1234", "1234", &hash(1)[..65]] {
            let response = post_relay(app.clone(), 3, bad).await;
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "input {bad:?}");
        }
    }

    #[tokio::test]
    async fn query_is_case_insensitive_and_narrow() {
        let (_dir, store, app) = setup().await;
        store
            .create(&RelayJob::new_pending(hash(1), 3, Utc::now()))
            .await
            .unwrap();

        let upper = hash(1).to_uppercase().replace("0X", "0x");
        let (status, body) = get_json(app, &format!("/relay/{upper}")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["txHash"], hash(1));
        assert_eq!(body["sourceDomain"], 3);
        assert_eq!(body["status"], "pending");
        assert!(body["outcome"].is_null());
        // internal fields must not leak through the projection
        let keys: Vec<&String> = body.as_object().unwrap().keys().collect();
        assert!(!keys.iter().any(|k| k.contains("poll")));
        assert!(!keys.iter().any(|k| k.contains("retry")));
        assert!(!keys.iter().any(|k| k.contains("attestedMessage")));
        assert!(!keys.iter().any(|k| k.contains("amount")));
    }

    #[tokio::test]
    async fn query_unknown_job_is_not_found() {
        let (_dir, _store, app) = setup().await;
        let (status, body) = get_json(app, &format!("/relay/{}", hash(9))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Job not found");
    }

    #[tokio::test]
    async fn health_reports_per_status_counts() {
        let (_dir, store, app) = setup().await;
        store
            .create(&RelayJob::new_pending(hash(1), 3, Utc::now()))
            .await
            .unwrap();
        store
            .create(&RelayJob::new_pending(hash(2), 6, Utc::now()))
            .await
            .unwrap();

        let (status, body) = get_json(app, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["jobs"]["pending"], 2);
        assert_eq!(body["jobs"]["confirmed"], 0);
    }

    #[tokio::test]
    async fn metrics_endpoint_serves_plaintext() {
        let (_dir, _store, app) = setup().await;
        let request = Request::builder()
            .uri("/metrics")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("relayer_jobs"));
    }
}
