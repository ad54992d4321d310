#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use cnet_auth::{AesGcmCipher, AuthenticatorTrait, SecretCipher, TestAuthenticator};
use cnet_backend::state::AppState;
use cnet_db::{create_pool, run_migrations, DbConnectionConfig, SqlStore};
use cnet_job_queue::{async_trait, JobQueueClient};
use cnet_jobs::probe::ProbeError;
use cnet_jobs::{JobKindValidator, ProbeReport, ProbeTarget, ServiceProbe};
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;

/// Healthy unless the hostname says otherwise.
pub struct HostnameProbe;

#[async_trait]
impl ServiceProbe for HostnameProbe {
    async fn probe(&self, target: &ProbeTarget) -> Result<ProbeReport, ProbeError> {
        if target.hostname.starts_with("unreachable") {
            return Err(ProbeError::Request("connection refused".into()));
        }
        Ok(ProbeReport {
            healthy: !target.hostname.starts_with("down"),
            message: format!("{} answered", target.service),
            response_time_ms: 7,
        })
    }
}

pub struct TestApp {
    pub state: Arc<AppState>,
    pub store: Arc<SqlStore>,
    pub cipher: Arc<AesGcmCipher>,
    pub user: Uuid,
}

impl TestApp {
    pub fn router(&self) -> Router {
        cnet_backend::build_router(self.state.clone())
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router().oneshot(request).await.expect("router response");
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read body");
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::String(
                String::from_utf8_lossy(&bytes).into_owned(),
            ))
        };
        (status, body)
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.send(
            Request::get(uri)
                .header("authorization", "Bearer test")
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    pub async fn send_json(&self, method: &str, uri: &str, body: Value) -> (StatusCode, Value) {
        self.send(
            Request::builder()
                .method(method)
                .uri(uri)
                .header("authorization", "Bearer test")
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }
}

pub async fn test_app_with(authenticator: Arc<dyn AuthenticatorTrait>, user: Uuid) -> TestApp {
    let pool = create_pool(&DbConnectionConfig::in_memory())
        .await
        .expect("create pool");
    run_migrations(&pool).await.expect("migrate");
    let store = Arc::new(SqlStore::new(pool));
    let cipher = Arc::new(AesGcmCipher::new("integration-password").expect("cipher"));
    let queue = JobQueueClient::new().with_validator(Arc::new(JobKindValidator));

    let state = AppState::new(
        store.clone(),
        authenticator,
        queue,
        cipher.clone() as Arc<dyn SecretCipher>,
        Arc::new(HostnameProbe),
    );
    TestApp {
        state: Arc::new(state),
        store,
        cipher,
        user,
    }
}

pub async fn test_app() -> TestApp {
    let user = Uuid::new_v4();
    test_app_with(Arc::new(TestAuthenticator::user(user)), user).await
}
