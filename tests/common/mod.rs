// Not every test binary exercises every helper.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{Method, Request},
    middleware, Router,
};
use chrono::Utc;
use orderflow_api::{
    auth::{AuthConfig, AuthService, AuthUser},
    config::AppConfig,
    db,
    entities::product,
    events::{self, EventSender},
    handlers::AppServices,
    AppState,
};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, Set};
use serde_json::Value;
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

const TEST_JWT_SECRET: &str =
    "integration_test_secret_key_with_enough_length_for_hs256_signing_x1";
pub const TEST_WEBHOOK_SECRET: &str = "integration_test_webhook_signing_secret";

/// Helper harness for spinning up an application backed by a throwaway
/// SQLite database file.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub auth_service: Arc<AuthService>,
    pub user_id: Uuid,
    token: String,
    admin_token: String,
    db_file: String,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    /// Construct a new test application with fresh database state.
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Construct a test application, letting the caller adjust the config
    /// (e.g. point the payment provider at a wiremock server).
    pub async fn with_config<F>(customize: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        let db_file = format!("orderflow_test_{}.db", Uuid::new_v4().simple());
        let _ = std::fs::remove_file(&db_file);

        let mut cfg = AppConfig::new(
            format!("sqlite://{db_file}?mode=rwc"),
            TEST_JWT_SECRET.to_string(),
            3600,
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        cfg.auto_migrate = true;
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.payment_webhook_secret = TEST_WEBHOOK_SECRET.to_string();
        cfg.payment_api_key = "test_key".to_string();
        cfg.payment_api_secret = "test_secret".to_string();
        customize(&mut cfg);

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");

        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let db_arc = Arc::new(pool);
        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = EventSender::new(event_tx);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let auth_service = Arc::new(AuthService::new(AuthConfig::new(
            cfg.jwt_secret.clone(),
            cfg.auth_issuer.clone(),
            cfg.auth_audience.clone(),
            Duration::from_secs(cfg.jwt_expiration as u64),
        )));

        let services = AppServices::new(db_arc.clone(), &cfg, Arc::new(event_sender.clone()));

        let state = AppState {
            db: db_arc,
            config: cfg.clone(),
            event_sender,
            services,
        };

        let user_id = Uuid::new_v4();
        let token = auth_service
            .issue_token(user_id, vec!["customer".to_string()])
            .expect("issue customer token");
        let admin_token = auth_service
            .issue_token(Uuid::new_v4(), vec!["admin".to_string()])
            .expect("issue admin token");

        let auth_service_for_layer = auth_service.clone();
        let api_router = orderflow_api::api_v1_routes().layer(middleware::from_fn_with_state(
            auth_service_for_layer,
            |axum::extract::State(auth): axum::extract::State<Arc<AuthService>>,
             mut req: Request<Body>,
             next: axum::middleware::Next| async move {
                req.extensions_mut().insert(auth);
                next.run(req).await
            },
        ));

        let router = Router::new()
            .nest("/api/v1", api_router)
            .with_state(state.clone());

        Self {
            router,
            state,
            auth_service,
            user_id,
            token,
            admin_token,
            db_file,
            _event_task: event_task,
        }
    }

    /// Bearer token for the default customer user.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Bearer token for an administrator.
    pub fn admin_token(&self) -> &str {
        &self.admin_token
    }

    /// Mint a token for an arbitrary user.
    pub fn token_for(&self, user_id: Uuid, roles: &[&str]) -> String {
        self.auth_service
            .issue_token(user_id, roles.iter().map(|r| r.to_string()).collect())
            .expect("issue token")
    }

    /// The default customer as the service layer sees it.
    pub fn customer(&self) -> AuthUser {
        AuthUser {
            user_id: self.user_id,
            roles: vec!["customer".to_string()],
            token_id: "test-token".to_string(),
        }
    }

    /// Send a request against the router with an optional bearer token.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);

        if let Some(tok) = token {
            builder = builder.header("authorization", format!("Bearer {}", tok));
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Convenience helper for authenticated JSON requests as the default
    /// customer.
    pub async fn request_authenticated(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> axum::response::Response {
        self.request(method, uri, body, Some(self.token())).await
    }

    /// Seed a catalog product the order flow can reference.
    pub async fn seed_product(&self, name: &str, price: Decimal) -> product::Model {
        let now = Utc::now();
        product::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            sku: Set(format!("SKU-{}", Uuid::new_v4().simple())),
            price: Set(price),
            currency: Set("USD".to_string()),
            is_active: Set(true),
            created_at: Set(now),
            updated_at: Set(Some(now)),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed product for tests")
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
        let _ = std::fs::remove_file(&self.db_file);
    }
}

/// Decode a response body as JSON.
pub async fn response_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}

/// Read a monetary field as a `Decimal` regardless of whether the backend
/// round-tripped it as a string or a number.
pub fn dec_field(value: &Value) -> Decimal {
    match value {
        Value::String(s) => s.parse().expect("decimal string"),
        Value::Number(n) => n.to_string().parse().expect("decimal number"),
        other => panic!("not a decimal field: {other:?}"),
    }
}

/// A standard inline shipping address payload.
pub fn address_payload() -> Value {
    serde_json::json!({
        "recipient": "Avery Quinn",
        "phone": "+1-555-0100",
        "line1": "12 Harbor Way",
        "line2": null,
        "city": "Portsmouth",
        "state": "NH",
        "postal_code": "03801",
        "country": "US"
    })
}
