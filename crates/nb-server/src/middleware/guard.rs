//! Session resolution and rate limiting, applied to every request
//!
//! ```ignore
//! Router::new()
//!     .route("/v2/tag", get(handlers::tags::list))
//!     .layer(middleware::from_fn_with_state(state.clone(), guard));
//! ```

use crate::error::{ApiError, ApiResultExt};
use crate::AppState;
use axum::{
    extract::{ConnectInfo, Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use nb_core::bearer_token;
use std::net::SocketAddr;
use tracing::debug;

/// Client IP used as the rate-limit key.
///
/// With `trust_proxy` the first `X-Forwarded-For` entry wins; otherwise the
/// socket peer address is used.
pub fn client_ip(request: &Request, trust_proxy: bool) -> String {
    if trust_proxy {
        if let Some(first) = request
            .headers()
            .get("x-forwarded-for")
            .and_then(|h| h.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
        {
            return first.to_string();
        }
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

pub async fn guard(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let ip = client_ip(&request, state.config.trust_proxy);
    let path = request.uri().path().to_string();

    if let Err(e) = state.rate_limiter.precheck(&ip) {
        debug!(ip = %ip, path = %path, "Rejected banned client");
        return Err(ApiError::from(e).with_resource(path));
    }

    let token = bearer_token(
        request
            .headers()
            .get(AUTHORIZATION)
            .and_then(|h| h.to_str().ok()),
    )
    .map(str::to_string);

    let access = state
        .sessions
        .resolve(token.as_deref())
        .await
        .at(&path)?;

    if let Err(e) = state.rate_limiter.admit(&ip, &access) {
        debug!(ip = %ip, path = %path, "Rejected client over the rate limit");
        return Err(ApiError::from(e).with_resource(path));
    }

    request.extensions_mut().insert(access);
    Ok(next.run(request).await)
}
