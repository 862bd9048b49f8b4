//! NB Music Server
//!
//! HTTP backend for NB Music: tag management and bilibili-cookie login on top
//! of a relational store and a key-value cache, with per-IP rate limiting.

mod config;
mod error;
mod extractors;
mod handlers;
mod middleware;
mod services;

use anyhow::{Context, Result};
use axum::{
    routing::{any, get, post, put},
    Router,
};
use nb_core::{RateLimiter, SessionResolver, Storage};
use nb_types::Config;
use services::BilibiliClient;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// DDL applied at startup when `schemaPath` is not configured
const BUNDLED_SCHEMA: &str = include_str!("../create-datatable.sql");

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub storage: Storage,
    pub sessions: SessionResolver,
    pub rate_limiter: RateLimiter,
    pub bilibili: Arc<BilibiliClient>,
}

impl AppState {
    pub fn new(config: Config, storage: Storage, bilibili: BilibiliClient) -> Self {
        let sessions = SessionResolver::new(storage.clone(), config.administrators.clone());
        let rate_limiter = RateLimiter::new(config.speed_limit);
        Self {
            config: Arc::new(config),
            storage,
            sessions,
            rate_limiter,
            bilibili: Arc::new(bilibili),
        }
    }
}

#[tokio::main]
async fn main() {
    // Set up panic hook to log crashes
    std::panic::set_hook(Box::new(|info| {
        let location = info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()));
        let payload = if let Some(s) = info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };
        eprintln!("[PANIC] at {:?}: {}", location, payload);
        tracing::error!("PANIC at {:?}: {}", location, payload);
    }));

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if let Err(e) = tracing_subscriber::fmt().with_env_filter(filter).try_init() {
        eprintln!("[FATAL] Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    info!("Starting NB Music Server v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run_server().await {
        error!("Server failed: {:#}", e);
        std::process::exit(1);
    }
}

async fn run_server() -> Result<()> {
    let config = config::load().await.context("Failed to load configuration")?;

    let storage = Storage::connect(&config)
        .await
        .context("Failed to connect storage backends")?;

    let schema = match &config.schema_path {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read schema script {}", path))?,
        None => BUNDLED_SCHEMA.to_string(),
    };
    storage
        .initialize_schema(&schema)
        .await
        .context("Failed to initialize data tables")?;

    let bilibili = BilibiliClient::new(Duration::from_secs(config.backend_timeout))
        .context("Failed to build HTTP client")?;

    let port = config.port;
    let state = AppState::new(config, storage, bilibili);
    let _sweepers = state.rate_limiter.spawn_sweepers();

    let app = app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("Server listening on {}", addr);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("Server error")?;

    Ok(())
}

pub fn app(state: AppState) -> Router {
    let mut router = Router::new()
        .nest("/v2", api_routes())
        .route("/v1", any(handlers::legacy_version))
        .route("/v1/*rest", any(handlers::legacy_version));

    if state.config.webhook.is_some() {
        router = router.route("/webhook", post(handlers::webhook::receive));
    }

    router
        .fallback(handlers::not_found)
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::guard,
        ))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/tag", get(handlers::tags::list).post(handlers::tags::create))
        .route(
            "/tag/:id",
            put(handlers::tags::update).delete(handlers::tags::delete),
        )
        .route("/auth/login", post(handlers::auth::login))
        .route(
            "/auth/renewal",
            get(handlers::auth::renewal_status).post(handlers::auth::renew),
        )
        .route("/auth/logout", post(handlers::auth::logout))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
        response::Response,
    };
    use nb_core::storage::{SqliteCache, SqliteDatabase};
    use nb_types::{Administrators, SpeedLimitConfig, WebhookConfig};
    use serde_json::{json, Value};
    use tower::ServiceExt; // for `oneshot`

    async fn test_state(config: Config) -> AppState {
        let storage = Storage::new(
            Arc::new(SqliteDatabase::connect_in_memory().await.unwrap()),
            Arc::new(SqliteCache::connect_in_memory().await.unwrap()),
        );
        storage.initialize_schema(BUNDLED_SCHEMA).await.unwrap();
        let bilibili =
            BilibiliClient::with_nav_url("http://127.0.0.1:1/nav", Duration::from_secs(1)).unwrap();
        AppState::new(config, storage, bilibili)
    }

    fn admin_config() -> Config {
        Config {
            administrators: Administrators::List(vec!["1".to_string()]),
            ..Config::default()
        }
    }

    async fn send(state: &AppState, request: Request<Body>) -> (StatusCode, Value) {
        let response: Response = app(state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    fn get_request(uri: &str, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {}", token));
        }
        builder.body(Body::empty()).unwrap()
    }

    fn json_request(method: &str, uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {}", token));
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    #[tokio::test]
    async fn test_unknown_route_is_not_found() {
        let state = test_state(Config::default()).await;
        let (status, body) = send(&state, get_request("/nothing/here", None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["status"], -6);
        assert!(body["data"].is_null());
    }

    #[tokio::test]
    async fn test_legacy_version_rejected() {
        let state = test_state(Config::default()).await;
        let (status, body) = send(&state, get_request("/v1/music/list", None)).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"]["code"], 503);
    }

    #[tokio::test]
    async fn test_tag_crud_as_administrator() {
        let state = test_state(admin_config()).await;
        state.sessions.create("admin", "1").await.unwrap();

        let (status, _) = send(
            &state,
            json_request(
                "POST",
                "/v2/tag",
                Some("admin"),
                json!({"name": "rock", "color": "#FF0000"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = send(
            &state,
            json_request(
                "POST",
                "/v2/tag",
                Some("admin"),
                json!({"name": "jazz", "color": "blue"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(&state, get_request("/v2/tag?search=o", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], 0);
        assert_eq!(body["data"]["total"], 1);
        let rock = &body["data"]["tags"][0];
        assert_eq!(rock["name"], "rock");
        assert_eq!(rock["color"], "#FF0000");
        let id = rock["id"].as_str().unwrap().to_string();
        let tag_path = format!("/v2/tag/{}", id);

        let (_, body) = send(&state, get_request("/v2/tag", None)).await;
        assert_eq!(body["data"]["total"], 2);
        let jazz_color = body["data"]["tags"][0]["color"].as_str().unwrap();
        assert_ne!(jazz_color, "blue");
        assert_eq!(jazz_color.len(), 7);

        let (status, _) = send(
            &state,
            json_request("PUT", &tag_path, Some("admin"), json!({"name": "metal"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(
            &state,
            json_request("PUT", &tag_path, Some("admin"), json!({"color": "nope"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], -2);

        let delete = Request::builder()
            .method("DELETE")
            .uri(&tag_path)
            .header("authorization", "Bearer admin")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(&state, delete).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(
            &state,
            json_request("PUT", &tag_path, Some("admin"), json!({"name": "gone"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["status"], -6);
    }

    #[tokio::test]
    async fn test_tag_writes_need_administrator() {
        let state = test_state(admin_config()).await;
        state.sessions.create("user", "2").await.unwrap();

        let body = json!({"name": "pop"});
        let (status, response) =
            send(&state, json_request("POST", "/v2/tag", None, body.clone())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(response["status"], -2);

        let (status, response) =
            send(&state, json_request("POST", "/v2/tag", Some("unknown"), body.clone())).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(response["status"], -4);

        let (status, response) =
            send(&state, json_request("POST", "/v2/tag", Some("user"), body)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(response["status"], -7);
    }

    #[tokio::test]
    async fn test_invalid_list_parameters() {
        let state = test_state(Config::default()).await;
        let (status, body) = send(&state, get_request("/v2/tag?limit=0", None)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], -2);
    }

    #[tokio::test]
    async fn test_renewal_and_logout() {
        let state = test_state(Config::default()).await;
        let now = nb_core::unix_now();
        state
            .sessions
            .create_at("old", "5", now - nb_types::SESSION_LIFETIME_SECS + 60)
            .await
            .unwrap();

        let (status, body) = send(&state, get_request("/v2/auth/renewal", Some("old"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["needRenewal"], true);

        let renew = Request::builder()
            .method("POST")
            .uri("/v2/auth/renewal")
            .header("authorization", "Bearer old")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&state, renew).await;
        assert_eq!(status, StatusCode::OK);
        let extended = body["data"]["expiresIn"].as_i64().unwrap();
        assert!(extended >= now + nb_types::SESSION_LIFETIME_SECS);

        let (_, body) = send(&state, get_request("/v2/auth/renewal", Some("old"))).await;
        assert_eq!(body["data"]["needRenewal"], false);

        let logout = Request::builder()
            .method("POST")
            .uri("/v2/auth/logout")
            .header("authorization", "Bearer old")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(&state, logout).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(&state, get_request("/v2/auth/renewal", Some("old"))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["status"], -4);
    }

    #[tokio::test]
    async fn test_login_requires_cookie() {
        let state = test_state(Config::default()).await;
        let request = Request::builder()
            .method("POST")
            .uri("/v2/auth/login")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&state, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], -2);
    }

    #[tokio::test]
    async fn test_login_reports_unreachable_bilibili() {
        let state = test_state(Config::default()).await;
        let request = Request::builder()
            .method("POST")
            .uri("/v2/auth/login")
            .header("cookie", "SESSDATA=abc")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&state, request).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["status"], -5);
    }

    #[tokio::test]
    async fn test_rate_limit_by_forwarded_ip() {
        let state = test_state(Config {
            trust_proxy: true,
            speed_limit: SpeedLimitConfig {
                guest_max_speed: 5,
                user_max_speed: 10,
                ban_duration: 600,
            },
            ..admin_config()
        })
        .await;

        let from = |ip: &str| {
            Request::builder()
                .uri("/v2/tag")
                .header("x-forwarded-for", format!("{}, 10.0.0.1", ip))
                .body(Body::empty())
                .unwrap()
        };

        for _ in 0..5 {
            let (status, _) = send(&state, from("203.0.113.7")).await;
            assert_eq!(status, StatusCode::OK);
        }
        let (status, body) = send(&state, from("203.0.113.7")).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["status"], -8);

        let (status, _) = send(&state, from("203.0.113.7")).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(state.rate_limiter.record("203.0.113.7").unwrap().visits, 6);

        // other clients are unaffected
        let (status, _) = send(&state, from("198.51.100.2")).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_administrator_bypasses_rate_limit() {
        let state = test_state(Config {
            speed_limit: SpeedLimitConfig {
                guest_max_speed: 1,
                user_max_speed: 1,
                ban_duration: 600,
            },
            ..admin_config()
        })
        .await;
        state.sessions.create("admin", "1").await.unwrap();

        for _ in 0..10 {
            let (status, _) = send(&state, get_request("/v2/tag", Some("admin"))).await;
            assert_eq!(status, StatusCode::OK);
        }
    }

    #[tokio::test]
    async fn test_webhook_mounted_only_when_configured() {
        let state = test_state(Config::default()).await;
        let request = Request::builder()
            .method("POST")
            .uri("/webhook")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(&state, request).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let state = test_state(Config {
            webhook: Some(WebhookConfig {
                secret: "s3cret".to_string(),
            }),
            ..Config::default()
        })
        .await;

        let missing = Request::builder()
            .method("POST")
            .uri("/webhook")
            .body(Body::from("{}"))
            .unwrap();
        let (status, _) = send(&state, missing).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let forged = Request::builder()
            .method("POST")
            .uri("/webhook")
            .header("x-github-event", "push")
            .header("x-hub-signature-256", "sha256=00")
            .body(Body::from("{}"))
            .unwrap();
        let (status, _) = send(&state, forged).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}
