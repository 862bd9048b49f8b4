//! Authentication handlers: bilibili cookie login and session upkeep

use crate::error::{ApiError, ApiResult, ApiResultExt};
use crate::extractors::RequestAccess;
use crate::services::BilibiliError;
use crate::AppState;
use axum::{
    extract::{OriginalUri, State},
    http::{header::COOKIE, HeaderMap},
    Json,
};
use nb_types::{ApiResponse, SESSION_NAMESPACE};
use rand::Rng;
use serde::Serialize;
use tracing::info;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub session_id: String,
    pub expires_in: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenewalStatus {
    pub need_renewal: bool,
    pub expires_in: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenewalResponse {
    pub expires_in: i64,
}

/// `<base36>.<hex>` session token
pub fn generate_session_id() -> String {
    let mut rng = rand::thread_rng();
    let head: String = (0..11)
        .map(|_| std::char::from_digit(rng.gen_range(0..36), 36).unwrap_or('0'))
        .collect();
    let tail = hex::encode(rng.gen::<[u8; 8]>());
    format!("{}.{}", head, tail)
}

/// POST /v2/auth/login
pub async fn login(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
) -> ApiResult<Json<ApiResponse<LoginResponse>>> {
    let path = uri.path().to_string();

    let cookie = headers
        .get(COOKIE)
        .and_then(|h| h.to_str().ok())
        .filter(|c| !c.is_empty())
        .ok_or_else(|| ApiError::bad_params().with_resource(&path))?;

    let user = state
        .bilibili
        .current_user(cookie)
        .await
        .map_err(|e| match e {
            BilibiliError::UserNotFound => ApiError::user_not_found(),
            other => ApiError::external("bilibili", other.to_string()),
        })
        .at(&path)?;

    let session_id = generate_session_id();
    let session = state
        .sessions
        .create(&session_id, &user.mid)
        .await
        .at_table(&path, SESSION_NAMESPACE)?;

    info!(user_id = %session.user_id, "User logged in");
    Ok(Json(ApiResponse::success(LoginResponse {
        session_id: session.session_id,
        expires_in: session.expires_in,
    })))
}

/// GET /v2/auth/renewal
pub async fn renewal_status(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    access: RequestAccess,
) -> ApiResult<Json<ApiResponse<RenewalStatus>>> {
    let session = access.require_login().at(uri.path())?;

    Ok(Json(ApiResponse::success(RenewalStatus {
        need_renewal: state.sessions.needs_renewal(session),
        expires_in: session.expires_in,
    })))
}

/// POST /v2/auth/renewal
pub async fn renew(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    access: RequestAccess,
) -> ApiResult<Json<ApiResponse<RenewalResponse>>> {
    let path = uri.path();
    let session = access.require_login().at(path)?;

    let renewed = state
        .sessions
        .renew(session)
        .await
        .at_table(path, SESSION_NAMESPACE)?;

    info!(user_id = %renewed.user_id, expires_in = renewed.expires_in, "Session renewed");
    Ok(Json(ApiResponse::success(RenewalResponse {
        expires_in: renewed.expires_in,
    })))
}

/// POST /v2/auth/logout
pub async fn logout(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    access: RequestAccess,
) -> ApiResult<Json<ApiResponse>> {
    let path = uri.path();
    let session = access.require_login().at(path)?;

    state
        .sessions
        .revoke(session)
        .await
        .at_table(path, SESSION_NAMESPACE)?;

    info!(user_id = %session.user_id, "User logged out");
    Ok(Json(ApiResponse::empty()))
}
