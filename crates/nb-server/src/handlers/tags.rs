//! Music tag handlers

use crate::error::{ApiError, ApiResult, ApiResultExt};
use crate::extractors::RequestAccess;
use crate::AppState;
use axum::{
    extract::{rejection::JsonRejection, rejection::QueryRejection, OriginalUri, Path, Query, State},
    Json,
};
use nb_core::storage::{Direction, Row};
use nb_core::NbError;
use nb_types::ApiResponse;
use once_cell::sync::Lazy;
use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

const TABLE: &str = "tags";
const DEFAULT_PAGE_SIZE: u64 = 15;

static COLOR_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^#[0-9A-Fa-f]{6}$").expect("valid color regex"));

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: String,
    pub name: String,
    pub color: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    limit: Option<String>,
    page: Option<String>,
    search: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TagPage {
    pub tags: Vec<Tag>,
    pub total: usize,
    pub page_total: u64,
    pub page: u64,
    pub limit: u64,
}

#[derive(Debug, Deserialize)]
pub struct TagBody {
    name: Option<String>,
    color: Option<String>,
}

fn parse_positive(value: Option<&str>, default: u64) -> Option<u64> {
    match value {
        None | Some("") => Some(default),
        Some(text) => text.trim().parse().ok().filter(|n| *n > 0),
    }
}

fn is_valid_color(color: &str) -> bool {
    COLOR_PATTERN.is_match(color)
}

/// Random medium-saturation color as `#rrggbb`
pub fn random_color() -> String {
    let hue = rand::thread_rng().gen_range(0..360) as f64;
    let chroma = 0.48;
    let x = chroma * (1.0 - ((hue / 60.0) % 2.0 - 1.0).abs());
    let m = 0.46;

    let (r, g, b) = match (hue / 60.0) as u32 {
        0 => (chroma, x, 0.0),
        1 => (x, chroma, 0.0),
        2 => (0.0, chroma, x),
        3 => (0.0, x, chroma),
        4 => (x, 0.0, chroma),
        _ => (chroma, 0.0, x),
    };

    let channel = |c: f64| ((c + m) * 255.0).round().clamp(0.0, 255.0) as u8;
    format!("#{:02x}{:02x}{:02x}", channel(r), channel(g), channel(b))
}

fn new_tag_id() -> String {
    hex::encode(rand::thread_rng().gen::<[u8; 6]>())
}

fn decode_tags(rows: Vec<Row>) -> Result<Vec<Tag>, NbError> {
    rows.into_iter()
        .map(|row| serde_json::from_value(Value::Object(row)).map_err(NbError::from))
        .collect()
}

/// Slice one page out of the full result. Pages past the end clamp to the
/// last page.
fn paginate(tags: Vec<Tag>, page: u64, limit: u64) -> TagPage {
    let total = tags.len();
    let page_total = (total as u64).div_ceil(limit);
    let page = page.min(page_total).max(1);
    let start = ((page - 1) * limit) as usize;

    TagPage {
        tags: tags
            .into_iter()
            .skip(start)
            .take(limit as usize)
            .collect(),
        total,
        page_total,
        page,
        limit,
    }
}

/// GET /v2/tag?limit=&page=&search=
pub async fn list(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> ApiResult<Json<ApiResponse<TagPage>>> {
    let path = uri.path().to_string();
    let Query(query) = query.map_err(|_| ApiError::bad_params().with_resource(&path))?;

    let limit = parse_positive(query.limit.as_deref(), DEFAULT_PAGE_SIZE);
    let page = parse_positive(query.page.as_deref(), 1);
    let (Some(limit), Some(page)) = (limit, page) else {
        return Err(ApiError::bad_params().with_resource(path));
    };
    let pattern = format!("%{}%", query.search.unwrap_or_default());

    let rows = state
        .storage
        .database()
        .table(TABLE)
        .and_then(|q| q.where_like("name", pattern.as_str()))
        .and_then(|q| q.order("name", Direction::Asc))
        .at_table(&path, TABLE)?
        .select()
        .await
        .and_then(|outcome| outcome.into_inner())
        .at_table(&path, TABLE)?;

    let tags = decode_tags(rows).at_table(&path, TABLE)?;
    Ok(Json(ApiResponse::success(paginate(tags, page, limit))))
}

/// POST /v2/tag
pub async fn create(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    access: RequestAccess,
    body: Result<Json<TagBody>, JsonRejection>,
) -> ApiResult<Json<ApiResponse>> {
    let path = uri.path().to_string();
    let session = access.require_administrator().at(&path)?;
    let Json(body) = body.map_err(|_| ApiError::bad_params().with_resource(&path))?;

    let name = match body.name {
        Some(name) if !name.trim().is_empty() => name,
        _ => return Err(ApiError::bad_params().with_resource(path)),
    };
    let color = body
        .color
        .filter(|c| is_valid_color(c))
        .unwrap_or_else(random_color);
    let id = new_tag_id();

    let mut row = Row::new();
    row.insert("id".to_string(), Value::String(id.clone()));
    row.insert("name".to_string(), Value::String(name));
    row.insert("color".to_string(), Value::String(color));

    state
        .storage
        .database()
        .table(TABLE)
        .at_table(&path, TABLE)?
        .insert(&row)
        .await
        .and_then(|outcome| outcome.into_inner())
        .map_err(|e| ApiError::from(e).with_param("id", &id))
        .at_table(&path, TABLE)?;

    info!(tag_id = %id, user_id = %session.user_id, "Tag created");
    Ok(Json(ApiResponse::empty()))
}

/// PUT /v2/tag/:id
pub async fn update(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    access: RequestAccess,
    Path(id): Path<String>,
    body: Result<Json<TagBody>, JsonRejection>,
) -> ApiResult<Json<ApiResponse>> {
    let path = uri.path().to_string();
    let session = access.require_administrator().at(&path)?;
    let Json(body) = body.map_err(|_| ApiError::bad_params().with_resource(&path))?;

    let mut row = Row::new();
    if let Some(name) = body.name.filter(|n| !n.trim().is_empty()) {
        row.insert("name".to_string(), Value::String(name));
    }
    if let Some(color) = body.color.filter(|c| is_valid_color(c)) {
        row.insert("color".to_string(), Value::String(color));
    }
    if row.is_empty() {
        return Err(ApiError::bad_params().with_resource(path));
    }

    let tag = state
        .storage
        .database()
        .table(TABLE)
        .and_then(|q| q.where_eq("id", id.as_str()))
        .at_table(&path, TABLE)?;

    let exists = tag
        .exist()
        .await
        .and_then(|outcome| outcome.into_inner())
        .at_table(&path, TABLE)?;
    if !exists {
        return Err(ApiError::not_found().with_resource(path).with_param("id", id));
    }

    tag.update(&row)
        .await
        .and_then(|outcome| outcome.into_inner())
        .map_err(|e| ApiError::from(e).with_param("id", &id))
        .at_table(&path, TABLE)?;

    info!(tag_id = %id, user_id = %session.user_id, "Tag updated");
    Ok(Json(ApiResponse::empty()))
}

/// DELETE /v2/tag/:id
pub async fn delete(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    access: RequestAccess,
    Path(id): Path<String>,
) -> ApiResult<Json<ApiResponse>> {
    let path = uri.path().to_string();
    let session = access.require_administrator().at(&path)?;

    let removed = state
        .storage
        .database()
        .table(TABLE)
        .and_then(|q| q.where_eq("id", id.as_str()))
        .at_table(&path, TABLE)?
        .delete()
        .await
        .and_then(|outcome| outcome.into_inner())
        .map_err(|e| ApiError::from(e).with_param("id", &id))
        .at_table(&path, TABLE)?;

    if removed == 0 {
        return Err(ApiError::not_found().with_resource(path).with_param("id", id));
    }

    info!(tag_id = %id, user_id = %session.user_id, "Tag deleted");
    Ok(Json(ApiResponse::empty()))
}
