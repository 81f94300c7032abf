use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::rejection::JsonRejection,
    http::Method,
    routing::{get, post},
    Json, Router,
};
use moodsync_shared::crypto::FieldCipher;
use moodsync_shared::identity;
use moodsync_shared::protocol::{
    AUTH_PATH, DELETE_PATH, ME_PATH, PULL_PATH, PUSH_PATH, USERNAME_PATH,
};
use moodsync_shared::types::IdentityProfile;
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::account;
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::rate_limit::RateGate;
use crate::remote::{self, RemoteStore, UserRecord};
use crate::sync;

#[derive(Clone)]
pub struct AppState {
    /// The remote store, or the error it failed to open with at boot.
    store: Result<Arc<dyn RemoteStore>, Arc<str>>,
    pub cipher: Arc<FieldCipher>,
    pub rate_gate: RateGate,
    pub config: Arc<ServerConfig>,
}

/// Operations gated independently per identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Pull,
    Push,
    Auth,
    Me,
    Username,
    Delete,
}

impl Op {
    fn as_str(&self) -> &'static str {
        match self {
            Op::Pull => "pull",
            Op::Push => "push",
            Op::Auth => "auth",
            Op::Me => "me",
            Op::Username => "username",
            Op::Delete => "delete",
        }
    }

    fn min_interval(&self, config: &ServerConfig) -> Duration {
        match self {
            Op::Pull => config.pull_min_interval,
            Op::Push => config.push_min_interval,
            Op::Auth | Op::Me | Op::Username | Op::Delete => config.account_min_interval,
        }
    }

    /// Sign-in creates the identity; everything else needs it to exist.
    fn requires_existing_user(&self) -> bool {
        !matches!(self, Op::Auth)
    }
}

/// A request that passed the guard chain.
pub struct Authorized {
    pub store: Arc<dyn RemoteStore>,
    pub profile: IdentityProfile,
    /// Stored record, always present unless the operation is sign-in.
    pub user: Option<UserRecord>,
}

impl AppState {
    pub fn new(
        config: ServerConfig,
        store: Result<Arc<dyn RemoteStore>, String>,
        cipher: FieldCipher,
    ) -> Self {
        Self {
            store: store.map_err(Arc::from),
            cipher: Arc::new(cipher),
            rate_gate: RateGate::new(),
            config: Arc::new(config),
        }
    }

    fn store(&self) -> Result<Arc<dyn RemoteStore>, ServerError> {
        self.store
            .clone()
            .map_err(|e| ServerError::StoreUnavailable(e.to_string()))
    }

    fn identify(&self, init_data: Option<&str>) -> Result<IdentityProfile, ServerError> {
        let payload = init_data
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .ok_or(ServerError::MissingIdentity)?;
        let Some(token) = self.config.bot_token.as_deref() else {
            tracing::warn!("BOT_TOKEN is not configured, rejecting identity");
            return Err(ServerError::InvalidSignature);
        };
        Ok(identity::verify_and_extract(payload, token)?)
    }

    /// Store availability, then identity, then existence, then the rate gate.
    pub async fn authorize(
        &self,
        init_data: Option<&str>,
        op: Op,
    ) -> Result<Authorized, ServerError> {
        let store = self.store()?;
        let profile = self.identify(init_data)?;

        let id = profile.id;
        let user = with_store(store.clone(), move |s| s.get_user(id)).await?;
        if op.requires_existing_user() && user.is_none() {
            return Err(ServerError::UserMissing);
        }

        let key = format!("{}:{}", profile.id, op.as_str());
        if !self
            .rate_gate
            .allow(&key, op.min_interval(&self.config))
            .await
        {
            return Err(ServerError::RateLimited(op.as_str()));
        }

        Ok(Authorized {
            store,
            profile,
            user,
        })
    }
}

/// Run a store call on the blocking pool.
pub async fn with_store<T, F>(store: Arc<dyn RemoteStore>, f: F) -> Result<T, ServerError>
where
    T: Send + 'static,
    F: FnOnce(&dyn RemoteStore) -> remote::Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(move || f(store.as_ref()))
        .await
        .map_err(|e| ServerError::Internal(format!("store task failed: {e}")))?
        .map_err(ServerError::from)
}

/// Unwrap a JSON body, turning extractor rejections into `bad-request`.
pub fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, ServerError> {
    body.map(|Json(value)| value)
        .map_err(|e| ServerError::BadRequest(e.body_text()))
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route(PULL_PATH, post(sync::pull).fallback(method_not_allowed))
        .route(PUSH_PATH, post(sync::push).fallback(method_not_allowed))
        .route(AUTH_PATH, post(account::sign_in).fallback(method_not_allowed))
        .route(ME_PATH, post(account::me).fallback(method_not_allowed))
        .route(
            USERNAME_PATH,
            post(account::update_username).fallback(method_not_allowed),
        )
        .route(DELETE_PATH, post(account::delete).fallback(method_not_allowed))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn method_not_allowed() -> ServerError {
    ServerError::MethodNotAllowed
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use moodsync_shared::identity::sign_payload;
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;
    use crate::remote::MemoryStore;

    pub const TOKEN: &str = "424242:TEST-TOKEN";

    pub fn config() -> ServerConfig {
        ServerConfig {
            bot_token: Some(TOKEN.into()),
            pull_min_interval: Duration::ZERO,
            push_min_interval: Duration::ZERO,
            account_min_interval: Duration::ZERO,
            ..ServerConfig::default()
        }
    }

    pub fn state_with(store: Arc<dyn RemoteStore>) -> AppState {
        AppState::new(
            config(),
            Ok(store),
            FieldCipher::from_passphrase(Some("test passphrase")),
        )
    }

    pub fn state() -> (AppState, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (state_with(store.clone()), store)
    }

    pub fn init_data(id: i64, username: Option<&str>) -> String {
        let user = match username {
            Some(name) => format!(r#"{{"id":{id},"first_name":"Test","username":"{name}"}}"#),
            None => format!(r#"{{"id":{id},"first_name":"Test"}}"#),
        };
        sign_payload(&[("auth_date", "1700000000"), ("user", &user)], TOKEN).unwrap()
    }

    pub async fn post_json(app: &Router, path: &str, body: Value) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri(path)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        send(app, request).await
    }

    pub async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::json;

    use super::test_support::*;
    use super::*;

    #[tokio::test]
    async fn test_health() {
        let (state, _) = state();
        let app = build_router(state);
        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_get_is_method_not_allowed() {
        let (state, _) = state();
        let app = build_router(state);
        let request = Request::builder()
            .method("GET")
            .uri(PULL_PATH)
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(body, json!({ "ok": false, "error": "method-not-allowed" }));
    }

    #[tokio::test]
    async fn test_missing_and_forged_identity() {
        let (state, _) = state();
        let app = build_router(state);

        let (status, body) = post_json(&app, PULL_PATH, json!({})).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "missing-identity-payload");

        let forged = init_data(1, None).replace("Test", "Evil");
        let (status, body) = post_json(&app, PULL_PATH, json!({ "initData": forged })).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "invalid-signature");
    }

    #[tokio::test]
    async fn test_malformed_body_is_bad_request() {
        let (state, _) = state();
        let app = build_router(state);
        let request = Request::builder()
            .method("POST")
            .uri(PUSH_PATH)
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "bad-request");
    }

    #[tokio::test]
    async fn test_store_boot_failure_is_cached_db_error() {
        let state = AppState::new(config(), Err("disk on fire".into()), FieldCipher::disabled());
        let app = build_router(state);
        let (status, body) =
            post_json(&app, PULL_PATH, json!({ "initData": init_data(1, None) })).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"], "db-error");
    }

    #[tokio::test]
    async fn test_unknown_user_is_gone() {
        let (state, _) = state();
        let app = build_router(state);
        let (status, body) =
            post_json(&app, PULL_PATH, json!({ "initData": init_data(77, None) })).await;
        assert_eq!(status, StatusCode::GONE);
        assert_eq!(body["error"], "user-missing");
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_gate_per_identity_and_op() {
        let store = Arc::new(crate::remote::MemoryStore::new());
        let mut cfg = config();
        cfg.pull_min_interval = Duration::from_secs(5);
        let state = AppState::new(cfg, Ok(store), FieldCipher::disabled());
        let app = build_router(state);

        let me = init_data(5, None);
        post_json(&app, AUTH_PATH, json!({ "initData": me })).await;

        let (status, _) = post_json(&app, PULL_PATH, json!({ "initData": me })).await;
        assert_eq!(status, StatusCode::OK);
        let (status, body) = post_json(&app, PULL_PATH, json!({ "initData": me })).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["error"], "rate-limited");

        // pushing is gated separately
        let (status, _) =
            post_json(&app, PUSH_PATH, json!({ "initData": me, "entries": [] })).await;
        assert_eq!(status, StatusCode::OK);

        tokio::time::advance(Duration::from_secs(6)).await;
        let (status, _) = post_json(&app, PULL_PATH, json!({ "initData": me })).await;
        assert_eq!(status, StatusCode::OK);
    }
}
