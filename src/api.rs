//! HTTP API server for job submission, status polling, and operations
//! endpoints
//!
//! Provides the asynchronous submit/status boundary plus the probe and
//! metrics endpoints container orchestration platforms expect.

use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;
use warp::http::StatusCode;
use warp::Filter;

use crate::error::{ServiceError, ServiceResult};
use crate::observability::metrics::metrics;
use crate::registry::{JobSnapshot, PartialResult};
use crate::service::CodingService;

/// Request body for `POST /run`
#[derive(Debug, Serialize, Deserialize)]
pub struct RunRequest {
    pub diagnosis_text: String,
}

/// Response body for `POST /run`
#[derive(Debug, Serialize, Deserialize)]
pub struct RunResponse {
    pub task_id: String,
}

/// Response body for `GET /status/{task_id}`
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
    pub result: Option<String>,
    pub error: Option<String>,
    pub partials: Vec<PartialResult>,
    /// Derived summary, e.g. "2/3 subtasks completed"
    pub progress: String,
}

impl StatusResponse {
    fn from_snapshot(snapshot: &JobSnapshot) -> Self {
        Self {
            status: snapshot.status.to_string(),
            result: snapshot.result.clone(),
            error: snapshot.error.clone(),
            partials: snapshot.partials.clone(),
            progress: snapshot.progress_summary(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    service: String,
    version: String,
    jobs: JobsOverview,
    timestamp: u64,
}

/// Job counts surfaced on `/health`; `tracked` grows for the life of the
/// process because jobs are never evicted
#[derive(Debug, Serialize)]
struct JobsOverview {
    tracked: usize,
    running: u64,
    completed: u64,
    failed: u64,
}

#[derive(Debug, Serialize)]
struct ReadinessResponse {
    ready: bool,
    terminology_records: usize,
    timestamp: u64,
}

#[derive(Debug, Serialize)]
struct LivenessResponse {
    alive: bool,
    timestamp: u64,
}

/// HTTP API server over an assembled [`CodingService`]
pub struct ApiServer {
    service: Arc<CodingService>,
}

impl ApiServer {
    pub fn new(service: Arc<CodingService>) -> Self {
        Self { service }
    }

    /// Build the complete route tree; exposed separately from
    /// [`serve`](ApiServer::serve) so tests can drive it through
    /// `warp::test` without binding a socket.
    pub fn routes(
        self: &Arc<Self>,
    ) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
        let run_server = Arc::clone(self);
        let status_server = Arc::clone(self);
        let health_server = Arc::clone(self);
        let ready_server = Arc::clone(self);

        // POST /run - accept a coding job
        let run_route = warp::path("run")
            .and(warp::path::end())
            .and(warp::post())
            .and(warp::body::json())
            .and_then(move |request: RunRequest| {
                let server = run_server.clone();
                async move {
                    match server.service.submit(&request.diagnosis_text).await {
                        Ok(job_id) => Ok::<_, Infallible>(warp::reply::with_status(
                            warp::reply::json(&RunResponse {
                                task_id: job_id.to_string(),
                            }),
                            StatusCode::OK,
                        )),
                        Err(error) => Ok::<_, Infallible>(warp::reply::with_status(
                            warp::reply::json(&ErrorResponse {
                                error: error.to_error_message(),
                            }),
                            StatusCode::BAD_REQUEST,
                        )),
                    }
                }
            });

        // GET /status/{task_id} - job snapshot
        let status_route = warp::path("status")
            .and(warp::path::param::<String>())
            .and(warp::path::end())
            .and(warp::get())
            .and_then(move |task_id: String| {
                let server = status_server.clone();
                async move {
                    // A malformed id is indistinguishable from an unknown one
                    let snapshot = match Uuid::parse_str(&task_id) {
                        Ok(job_id) => server.service.status(job_id).await,
                        Err(_) => None,
                    };

                    match snapshot {
                        Some(snapshot) => Ok::<_, Infallible>(warp::reply::with_status(
                            warp::reply::json(&StatusResponse::from_snapshot(&snapshot)),
                            StatusCode::OK,
                        )),
                        None => Ok::<_, Infallible>(warp::reply::with_status(
                            warp::reply::json(&ErrorResponse {
                                error: "Task not found".to_string(),
                            }),
                            StatusCode::NOT_FOUND,
                        )),
                    }
                }
            });

        // GET /health - service health and job counts
        let health_route = warp::path("health").and(warp::get()).and_then(move || {
            let server = health_server.clone();
            async move {
                let response = server.health_response().await;
                Ok::<_, Infallible>(warp::reply::json(&response))
            }
        });

        // GET /ready - readiness probe, healthy once reference data is loaded
        let ready_route = warp::path("ready").and(warp::get()).and_then(move || {
            let server = ready_server.clone();
            async move {
                let records = server.service.store().len();
                let ready = records > 0;
                let response = ReadinessResponse {
                    ready,
                    terminology_records: records,
                    timestamp: current_timestamp(),
                };
                let status_code = if ready {
                    StatusCode::OK
                } else {
                    StatusCode::SERVICE_UNAVAILABLE
                };
                Ok::<_, Infallible>(warp::reply::with_status(
                    warp::reply::json(&response),
                    status_code,
                ))
            }
        });

        // GET /live - liveness probe
        let live_route = warp::path("live").and(warp::get()).and_then(move || async move {
            let response = LivenessResponse {
                alive: true,
                timestamp: current_timestamp(),
            };
            Ok::<_, Infallible>(warp::reply::json(&response))
        });

        // GET /metrics - complete metrics export
        let metrics_route = warp::path("metrics").and(warp::get()).and_then(move || async move {
            let snapshot = metrics().get_metrics();
            Ok::<_, Infallible>(warp::reply::json(&snapshot))
        });

        run_route
            .or(status_route)
            .or(health_route)
            .or(ready_route)
            .or(live_route)
            .or(metrics_route)
            .with(warp::cors().allow_any_origin())
    }

    async fn health_response(&self) -> HealthResponse {
        let job_metrics = metrics().get_metrics().jobs;
        HealthResponse {
            status: "healthy".to_string(),
            service: self.service.config().service.name.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            jobs: JobsOverview {
                tracked: self.service.registry().job_count().await,
                running: job_metrics.jobs_running,
                completed: job_metrics.jobs_completed,
                failed: job_metrics.jobs_failed,
            },
            timestamp: current_timestamp(),
        }
    }

    /// Bind and serve until the process exits
    pub async fn serve(self: Arc<Self>) -> ServiceResult<()> {
        let config = self.service.config();
        let address: IpAddr = config.http.bind_address.parse().map_err(|e| {
            ServiceError::invalid_input(format!(
                "http.bind_address '{}' is not a valid address: {e}",
                config.http.bind_address
            ))
        })?;
        let port = config.http.port;

        tracing::info!(%address, port, "starting HTTP API server");
        let routes = self.routes();
        warp::serve(routes).run((address, port)).await;
        Ok(())
    }
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use crate::terminology::{TerminologyRecord, TerminologyStore};
    use crate::testing::mocks::MockLlmProvider;
    use serde_json::json;
    use std::time::Duration;

    fn record(code: &str, description: &str) -> TerminologyRecord {
        TerminologyRecord {
            code: code.to_string(),
            description: description.to_string(),
            chapter: "Test chapter".to_string(),
            domain: "Test domain".to_string(),
            url: format!("https://icd.who.int/browse10/2019/en#/{code}"),
        }
    }

    fn suggestion_payload() -> String {
        json!({
            "icd10": [
                {"code": "G40.9", "description": "Epilepsy, unspecified"},
                {"code": "F32.9", "description": "Major depressive disorder, single episode, unspecified"},
                {"code": "G43.9", "description": "Migraine, unspecified"}
            ],
            "snomed": [
                {"code": "84757009", "term": "Epilepsy"},
                {"code": "35489007", "term": "Depressive disorder"},
                {"code": "37796009", "term": "Migraine"}
            ],
            "explanation": "Three distinct neurological and mood conditions."
        })
        .to_string()
    }

    fn test_server() -> Arc<ApiServer> {
        let store = Arc::new(
            TerminologyStore::from_records(vec![
                record("G40.9", "Epilepsy, unspecified"),
                record("F32.9", "Major depressive disorder, single episode, unspecified"),
                record("G43.9", "Migraine, unspecified"),
            ])
            .unwrap(),
        );
        let service = CodingService::assemble(
            test_config(),
            store,
            Arc::new(MockLlmProvider::single_response(suggestion_payload())),
        );
        Arc::new(ApiServer::new(Arc::new(service)))
    }

    async fn poll_until_terminal(server: &Arc<ApiServer>, task_id: &str) -> StatusResponse {
        let routes = server.routes();
        for _ in 0..200 {
            let response = warp::test::request()
                .method("GET")
                .path(&format!("/status/{task_id}"))
                .reply(&routes)
                .await;
            assert_eq!(response.status(), 200);
            let status: StatusResponse = serde_json::from_slice(response.body()).unwrap();
            if status.status != "running" {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("task {task_id} never reached a terminal status");
    }

    #[tokio::test]
    async fn test_run_accepts_job_and_returns_task_id() {
        let server = test_server();

        let response = warp::test::request()
            .method("POST")
            .path("/run")
            .json(&RunRequest {
                diagnosis_text: "Seizures, Depression, Migraine".to_string(),
            })
            .reply(&server.routes())
            .await;

        assert_eq!(response.status(), 200);
        let body: RunResponse = serde_json::from_slice(response.body()).unwrap();
        assert!(Uuid::parse_str(&body.task_id).is_ok());
    }

    #[tokio::test]
    async fn test_run_rejects_blank_diagnosis() {
        let server = test_server();

        let response = warp::test::request()
            .method("POST")
            .path("/run")
            .json(&RunRequest {
                diagnosis_text: "   ".to_string(),
            })
            .reply(&server.routes())
            .await;

        assert_eq!(response.status(), 400);
        let body: ErrorResponse = serde_json::from_slice(response.body()).unwrap();
        assert!(body.error.contains("diagnosis_text"));
    }

    #[tokio::test]
    async fn test_status_flow_to_completion() {
        let server = test_server();

        let response = warp::test::request()
            .method("POST")
            .path("/run")
            .json(&RunRequest {
                diagnosis_text: "Seizures, Depression, Migraine".to_string(),
            })
            .reply(&server.routes())
            .await;
        let body: RunResponse = serde_json::from_slice(response.body()).unwrap();

        let status = poll_until_terminal(&server, &body.task_id).await;

        assert_eq!(status.status, "completed");
        assert_eq!(status.partials.len(), 3);
        assert_eq!(status.progress, "3/3 subtasks completed");
        assert!(status.error.is_none());
        assert!(status
            .result
            .unwrap()
            .contains("Coding report for: Seizures, Depression, Migraine"));
    }

    #[tokio::test]
    async fn test_status_unknown_task_is_not_found() {
        let server = test_server();

        let response = warp::test::request()
            .method("GET")
            .path(&format!("/status/{}", Uuid::new_v4()))
            .reply(&server.routes())
            .await;

        assert_eq!(response.status(), 404);
        let body: ErrorResponse = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body.error, "Task not found");
    }

    #[tokio::test]
    async fn test_status_malformed_id_is_not_found() {
        let server = test_server();

        let response = warp::test::request()
            .method("GET")
            .path("/status/not-a-uuid")
            .reply(&server.routes())
            .await;

        assert_eq!(response.status(), 404);
    }

    #[tokio::test]
    async fn test_status_reads_are_stable_without_mutation() {
        let server = test_server();

        let response = warp::test::request()
            .method("POST")
            .path("/run")
            .json(&RunRequest {
                diagnosis_text: "Migraine".to_string(),
            })
            .reply(&server.routes())
            .await;
        let body: RunResponse = serde_json::from_slice(response.body()).unwrap();
        poll_until_terminal(&server, &body.task_id).await;

        let routes = server.routes();
        let first = warp::test::request()
            .method("GET")
            .path(&format!("/status/{}", body.task_id))
            .reply(&routes)
            .await;
        let second = warp::test::request()
            .method("GET")
            .path(&format!("/status/{}", body.task_id))
            .reply(&routes)
            .await;

        assert_eq!(first.status(), 200);
        assert_eq!(first.body(), second.body());
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let server = test_server();

        let response = warp::test::request()
            .method("GET")
            .path("/health")
            .reply(&server.routes())
            .await;

        assert_eq!(response.status(), 200);
        let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["service"], "medcoder-test");
        assert!(body["jobs"]["tracked"].is_number());
    }

    #[tokio::test]
    async fn test_ready_with_loaded_table() {
        let server = test_server();

        let response = warp::test::request()
            .method("GET")
            .path("/ready")
            .reply(&server.routes())
            .await;

        assert_eq!(response.status(), 200);
        let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body["ready"], true);
        assert_eq!(body["terminology_records"], 3);
    }

    #[tokio::test]
    async fn test_live_endpoint() {
        let server = test_server();

        let response = warp::test::request()
            .method("GET")
            .path("/live")
            .reply(&server.routes())
            .await;

        assert_eq!(response.status(), 200);
        let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body["alive"], true);
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let server = test_server();

        let response = warp::test::request()
            .method("GET")
            .path("/metrics")
            .reply(&server.routes())
            .await;

        assert_eq!(response.status(), 200);
        let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
        assert!(body["jobs"].is_object());
        assert!(body["steps"].is_object());
        assert!(body["terminology"].is_object());
    }
}
