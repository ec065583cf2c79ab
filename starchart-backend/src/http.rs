///! HTTP adapter
///!
///! Thin axum layer over `StarChartService`: request decoding, status
///! mapping and PNG responses. No business logic lives here.
use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::error::StarChartError;
use crate::model::{ArtifactId, ArtifactSummary, Fingerprint, Metadata, ObservationRequest};
use crate::service::StarChartService;

pub const FINGERPRINT_HEADER: &str = "x-fingerprint";
pub const CACHE_HIT_HEADER: &str = "x-cache-hit";

const DEFAULT_PAGE_SIZE: usize = 20;

type AppState = Arc<StarChartService>;

pub fn router(service: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/v1/starmaps", get(list_maps))
        .route("/api/v1/starmaps/generate", post(generate_map))
        .route("/api/v1/starmaps/{fingerprint}/save", post(save_map))
        .route(
            "/api/v1/starmaps/{id}",
            get(fetch_image).patch(update_map).delete(delete_map),
        )
        .route("/api/v1/starmaps/{id}/meta", get(fetch_meta))
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}

/// Error body: `{"error": "..."}`
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl From<StarChartError> for ApiError {
    fn from(err: StarChartError) -> Self {
        let status = match &err {
            StarChartError::InvalidObservation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            StarChartError::NotFound { .. } => StatusCode::NOT_FOUND,
            StarChartError::Generation(_) => StatusCode::INTERNAL_SERVER_ERROR,
            StarChartError::StoreUnavailable(_)
            | StarChartError::CacheUnavailable(_)
            | StarChartError::CatalogUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        if status.is_server_error() {
            tracing::error!("Request failed: {}", err);
        }
        Self::new(status, err.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "error": self.message });
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Body of save and update requests
#[derive(Debug, Default, Deserialize)]
pub struct ArtifactPatch {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub metadata: Option<Metadata>,
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    #[serde(default)]
    pub offset: usize,
    #[serde(default = "default_page_size")]
    pub limit: usize,
}

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

/// Artifact without its image bytes
#[derive(Debug, Serialize)]
struct ArtifactMeta {
    #[serde(flatten)]
    summary: ArtifactSummary,
    metadata: Option<Metadata>,
    image_bytes: usize,
}

fn parse_artifact_id(raw: &str) -> ApiResult<ArtifactId> {
    raw.parse()
        .map_err(|_| StarChartError::not_found("artifact", raw).into())
}

fn png(bytes: Vec<u8>, mut headers: HeaderMap) -> Response {
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("image/png"));
    (headers, bytes).into_response()
}

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn generate_map(
    State(service): State<AppState>,
    request: Result<Json<ObservationRequest>, JsonRejection>,
) -> ApiResult<Response> {
    let Json(request) = request?;
    let map = service.generate(&request).await?;

    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(map.fingerprint.as_str()) {
        headers.insert(FINGERPRINT_HEADER, value);
    }
    headers.insert(
        CACHE_HIT_HEADER,
        HeaderValue::from_static(if map.cache_hit { "true" } else { "false" }),
    );
    Ok(png(map.bytes().to_vec(), headers))
}

async fn save_map(
    State(service): State<AppState>,
    Path(fingerprint): Path<String>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<ArtifactSummary>)> {
    let fingerprint = Fingerprint::parse(&fingerprint)
        .map_err(|_| StarChartError::not_found("star map", &fingerprint))?;
    // Saving without a body is allowed
    let patch: ArtifactPatch = if body.iter().all(u8::is_ascii_whitespace) {
        ArtifactPatch::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::new(StatusCode::UNPROCESSABLE_ENTITY, e.to_string()))?
    };

    let summary = service
        .promote(&fingerprint, patch.title, patch.metadata)
        .await?;
    Ok((StatusCode::CREATED, Json(summary)))
}

async fn fetch_image(
    State(service): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let artifact = service.fetch(parse_artifact_id(&id)?).await?;
    Ok(png(artifact.image, HeaderMap::new()))
}

async fn fetch_meta(
    State(service): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let artifact = service.fetch(parse_artifact_id(&id)?).await?;
    let meta = ArtifactMeta {
        summary: artifact.summary(),
        image_bytes: artifact.image.len(),
        metadata: artifact.metadata,
    };
    Ok(Json(meta).into_response())
}

async fn update_map(
    State(service): State<AppState>,
    Path(id): Path<String>,
    patch: Result<Json<ArtifactPatch>, JsonRejection>,
) -> ApiResult<Json<ArtifactSummary>> {
    let id = parse_artifact_id(&id)?;
    let Json(patch) = patch?;
    let summary = service.update(id, patch.title, patch.metadata).await?;
    Ok(Json(summary))
}

async fn list_maps(
    State(service): State<AppState>,
    Query(params): Query<ListParams>,
) -> impl IntoResponse {
    Json(service.list(params.offset, params.limit).await)
}

async fn delete_map(
    State(service): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    service.delete(parse_artifact_id(&id)?).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ArtifactPage;
    use crate::service::test_support::{nyc, service};
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    async fn app() -> Router {
        let (service, _) = service().await;
        router(Arc::new(service))
    }

    fn json_request(method: &str, uri: &str, body: &Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn empty_request(method: &str, uri: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    async fn body_bytes(response: Response) -> Bytes {
        to_bytes(response.into_body(), usize::MAX).await.unwrap()
    }

    async fn body_json(response: Response) -> Value {
        serde_json::from_slice(&body_bytes(response).await).unwrap()
    }

    /// Generate the NYC map and return its fingerprint
    async fn generate(app: &Router) -> String {
        let body = serde_json::to_value(nyc(40.7128)).unwrap();
        let response = app
            .clone()
            .oneshot(json_request("POST", "/api/v1/starmaps/generate", &body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        response.headers()[FINGERPRINT_HEADER]
            .to_str()
            .unwrap()
            .to_string()
    }

    async fn save(app: &Router, fingerprint: &str, body: &Value) -> Value {
        let uri = format!("/api/v1/starmaps/{}/save", fingerprint);
        let response = app
            .clone()
            .oneshot(json_request("POST", &uri, body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        body_json(response).await
    }

    #[tokio::test]
    async fn test_health() {
        let response = app().await.oneshot(empty_request("GET", "/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_generate_returns_png_with_cache_headers() {
        let app = app().await;
        let body = serde_json::to_value(nyc(40.7128)).unwrap();

        let first = app
            .clone()
            .oneshot(json_request("POST", "/api/v1/starmaps/generate", &body))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(first.headers()[header::CONTENT_TYPE], "image/png");
        assert_eq!(first.headers()[CACHE_HIT_HEADER], "false");
        assert_eq!(first.headers()[FINGERPRINT_HEADER].len(), 64);
        let first_png = body_bytes(first).await;
        assert_eq!(&first_png[..4], b"\x89PNG");

        let nearby = serde_json::to_value(nyc(40.71281)).unwrap();
        let second = app
            .oneshot(json_request("POST", "/api/v1/starmaps/generate", &nearby))
            .await
            .unwrap();
        assert_eq!(second.headers()[CACHE_HIT_HEADER], "true");
        assert_eq!(body_bytes(second).await, first_png);
    }

    #[tokio::test]
    async fn test_generate_rejects_invalid_observation() {
        let app = app().await;
        let mut request = serde_json::to_value(nyc(40.7128)).unwrap();
        request["latitude"] = json!(91.0);
        let response = app
            .clone()
            .oneshot(json_request("POST", "/api/v1/starmaps/generate", &request))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body_json(response).await["error"].is_string());

        // Missing required fields
        let response = app
            .oneshot(json_request("POST", "/api/v1/starmaps/generate", &json!({"latitude": 1.0})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_save_fetch_and_meta() {
        let app = app().await;
        let fingerprint = generate(&app).await;
        let saved = save(
            &app,
            &fingerprint,
            &json!({"title": "Our night", "metadata": {"occasion": "anniversary"}}),
        )
        .await;
        assert_eq!(saved["title"], "Our night");
        let id = saved["id"].as_str().unwrap().to_string();

        let image = app
            .clone()
            .oneshot(empty_request("GET", &format!("/api/v1/starmaps/{}", id)))
            .await
            .unwrap();
        assert_eq!(image.status(), StatusCode::OK);
        assert_eq!(image.headers()[header::CONTENT_TYPE], "image/png");
        let image = body_bytes(image).await;

        let meta = app
            .oneshot(empty_request("GET", &format!("/api/v1/starmaps/{}/meta", id)))
            .await
            .unwrap();
        let meta = body_json(meta).await;
        assert_eq!(meta["id"], json!(id));
        assert_eq!(meta["metadata"]["occasion"], "anniversary");
        assert_eq!(meta["image_bytes"], json!(image.len()));
    }

    #[tokio::test]
    async fn test_save_without_body_and_unknown_fingerprint() {
        let app = app().await;
        let fingerprint = generate(&app).await;

        let response = app
            .clone()
            .oneshot(empty_request("POST", &format!("/api/v1/starmaps/{}/save", fingerprint)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let unknown = "0".repeat(64);
        let response = app
            .clone()
            .oneshot(empty_request("POST", &format!("/api/v1/starmaps/{}/save", unknown)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app
            .oneshot(empty_request("POST", "/api/v1/starmaps/not-a-fingerprint/save"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_update_list_delete() {
        let app = app().await;
        let fingerprint = generate(&app).await;
        let saved = save(&app, &fingerprint, &json!({})).await;
        let id = saved["id"].as_str().unwrap().to_string();
        let uri = format!("/api/v1/starmaps/{}", id);

        let patched = app
            .clone()
            .oneshot(json_request("PATCH", &uri, &json!({"title": "Renamed"})))
            .await
            .unwrap();
        assert_eq!(patched.status(), StatusCode::OK);
        assert_eq!(body_json(patched).await["title"], "Renamed");

        let listed = app
            .clone()
            .oneshot(empty_request("GET", "/api/v1/starmaps?offset=0&limit=5"))
            .await
            .unwrap();
        let page: ArtifactPage = serde_json::from_slice(&body_bytes(listed).await).unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.limit, 5);
        assert_eq!(page.items[0].title.as_deref(), Some("Renamed"));

        let deleted = app.clone().oneshot(empty_request("DELETE", &uri)).await.unwrap();
        assert_eq!(deleted.status(), StatusCode::NO_CONTENT);

        let again = app.clone().oneshot(empty_request("DELETE", &uri)).await.unwrap();
        assert_eq!(again.status(), StatusCode::NOT_FOUND);

        let missing = app.oneshot(empty_request("GET", &uri)).await.unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }
}
