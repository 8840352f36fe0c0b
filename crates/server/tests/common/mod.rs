//! Common test utilities for API testing with mocks.
//!
//! The fixture builds the real router over in-process stores and an engine
//! wired to the mock collaborators, so tests drive full poll cycles through
//! the HTTP surface without a ticketing system or gateway.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use qrelease_core::config::{
    DatabaseConfig, GatewayConfig, NotifierConfig, ServerConfig, ServiceNowConfig,
    ServiceNowStates,
};
use qrelease_core::testing::MockServices;
use qrelease_core::{
    create_audit_system, AuditStore, Config, JustificationPolicy, ProgressStore,
    SqliteAuditStore, SqliteProgressStore, WorkflowEngine,
};

/// Re-export fixtures for test convenience
pub use qrelease_core::testing::fixtures;

pub const SERVICENOW_PASSWORD: &str = "sn-password-do-not-leak";
pub const GATEWAY_SECRET: &str = "gw-secret-do-not-leak";

/// Test fixture with the router, its stores and the engine's mocks.
pub struct TestFixture {
    pub router: Router,
    /// Mock collaborators behind the engine
    pub mocks: MockServices,
    pub progress_store: Arc<dyn ProgressStore>,
    pub audit_store: Arc<dyn AuditStore>,
    /// Holds the test database
    pub temp_dir: TempDir,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
}

/// Configuration for test fixture.
#[derive(Debug, Clone)]
pub struct TestConfig {
    /// Build the workflow engine; without it the service runs in
    /// journal-only mode, as when collaborators are not configured.
    pub enable_engine: bool,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            enable_engine: true,
        }
    }
}

impl TestConfig {
    pub fn without_engine() -> Self {
        Self {
            enable_engine: false,
        }
    }
}

fn test_config(temp_dir: &TempDir, with_collaborators: bool) -> Config {
    Config {
        server: ServerConfig {
            host: std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST),
            port: 8080, // Not used for in-process testing
        },
        database: DatabaseConfig {
            path: temp_dir.path().join("test.db"),
        },
        engine: fixtures::fast_engine_config(),
        justification_policy: fixtures::vendor_policy(),
        notifier: NotifierConfig {
            distribution_list: fixtures::ALERT_LIST.to_string(),
            subject_prefix: "[qrelease]".to_string(),
            smtp: None,
        },
        servicenow: with_collaborators.then(|| ServiceNowConfig {
            url: "https://example.service-now.com".to_string(),
            username: "qrelease".to_string(),
            password: SERVICENOW_PASSWORD.to_string(),
            assignment_group: "Mail Operations".to_string(),
            tables: vec!["incident".to_string()],
            message_guid_field: "u_message_guid".to_string(),
            batch_size: 50,
            timeout_secs: 30,
            states: ServiceNowStates::default(),
        }),
        gateway: with_collaborators.then(|| GatewayConfig {
            url: "https://gateway.example.com".to_string(),
            principal: "qrelease-client".to_string(),
            secret: GATEWAY_SECRET.to_string(),
            timeout_secs: 30,
            status_query: true,
        }),
    }
}

impl TestFixture {
    /// Create a new test fixture with the engine enabled.
    pub async fn new() -> Self {
        Self::with_config(TestConfig::default()).await
    }

    pub async fn with_config(test_config_opts: TestConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config = test_config(&temp_dir, test_config_opts.enable_engine);
        let db_path = config.database.path.clone();

        let audit_store: Arc<dyn AuditStore> = Arc::new(
            SqliteAuditStore::new(&db_path).expect("Failed to create audit store"),
        );
        let progress_store: Arc<dyn ProgressStore> = Arc::new(
            SqliteProgressStore::new(&db_path).expect("Failed to create progress store"),
        );

        let (audit_handle, audit_writer) = create_audit_system(Arc::clone(&audit_store), 100);
        tokio::spawn(audit_writer.run());

        let mocks = MockServices::new();
        let engine = test_config_opts.enable_engine.then(|| {
            Arc::new(
                WorkflowEngine::new(
                    config.engine.clone(),
                    JustificationPolicy::new(config.justification_policy.clone()),
                    fixtures::alert_target(),
                    Arc::clone(&progress_store),
                    mocks.collaborators(),
                )
                .with_audit(audit_handle.clone()),
            )
        });

        let state = Arc::new(qrelease_server::state::AppState::new(
            config,
            audit_handle,
            Arc::clone(&audit_store),
            Arc::clone(&progress_store),
            engine,
        ));

        let router = qrelease_server::api::create_router(state);

        Self {
            router,
            mocks,
            progress_store,
            audit_store,
            temp_dir,
        }
    }

    /// Send a GET request to the test server.
    pub async fn get(&self, path: &str) -> TestResponse {
        self.request("GET", path).await
    }

    /// Send a POST request without a body.
    pub async fn post(&self, path: &str) -> TestResponse {
        self.request("POST", path).await
    }

    /// Send a GET request and return the raw body text.
    pub async fn get_text(&self, path: &str) -> (StatusCode, String) {
        let request = Request::builder()
            .method("GET")
            .uri(path)
            .body(Body::empty())
            .unwrap();

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();

        (status, String::from_utf8_lossy(&body_bytes).to_string())
    }

    async fn request(&self, method: &str, path: &str) -> TestResponse {
        let request = Request::builder()
            .method(method)
            .uri(path)
            .body(Body::empty())
            .unwrap();

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();

        let body: Value = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
        };

        TestResponse { status, body }
    }

    /// Query the audit endpoint until it reports at least `min_total` events.
    ///
    /// Audit events are written by a background task, so they land shortly
    /// after the request that produced them.
    pub async fn wait_for_audit(&self, query: &str, min_total: i64) -> Value {
        let path = format!("/api/v1/audit?{}", query);
        for _ in 0..100 {
            let response = self.get(&path).await;
            if response.body["total"].as_i64().unwrap_or(0) >= min_total {
                return response.body;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("Audit query '{}' never reached {} events", query, min_total);
    }
}

/// Helper to assert a response has expected status.
#[macro_export]
macro_rules! assert_status {
    ($response:expr, $status:expr) => {
        assert_eq!(
            $response.status, $status,
            "Expected status {:?}, got {:?}. Body: {}",
            $status,
            $response.status,
            serde_json::to_string_pretty(&$response.body).unwrap_or_default()
        );
    };
}
