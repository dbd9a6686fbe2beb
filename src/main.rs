mod amazon;
mod http;
mod idempotency;
mod jobs;
mod llm;
mod media;
mod metrics;
mod models;
mod pricing;
mod security;
mod store;
mod tasks;

use amazon::AmazonClient;
use axum::{
    Json, Router,
    body::Body,
    extract::{
        DefaultBodyLimit, Extension, Multipart, Path, Query, State,
        multipart::{Field, MultipartError},
    },
    http::{HeaderMap, StatusCode, header},
    middleware,
    response::{Html, IntoResponse, Response},
    routing::{get, patch, post},
};
use chrono::{DateTime, Utc};
use jobs::{JobHooks, JobQueue, JobQueueConfig, JobStatus, SubmitError};
use llm::LlmClient;
use media::{MediaError, MediaStore, PhotoUpload};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use models::{
    ApiError, CURRENT_SCHEMA_VERSION, ConditionData, ListingData, PricingSummary,
    ProductListResponse, ProductRecord, ProductStatus, ProductSummary, SourceData, UploadResponse,
};
use security::{AuthContext, AuthState, OperatorRole, require_api_auth};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{collections::HashMap, net::SocketAddr, sync::Arc};
use store::{ProductFilter, ProductStore, StoreError};
use tasks::{PublishConfig, TASK_PREPARE_LISTING, TaskRuntime};
use tokio::sync::Mutex;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};
use uuid::Uuid;

const MAX_PAGE_SIZE: usize = 100;
const IMAGE_SEARCH_ALTERNATIVES: usize = 3;

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!(target = "rastro.api", "server crashed: {err}");
    }
}

async fn run() -> eyre::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let auth_state = AuthState::from_env();

    let data_root = store::data_root_from_env();
    let products = ProductStore::new(data_root.clone());
    let media = MediaStore::new(data_root);

    let amazon = AmazonClient::from_env().map(Arc::new);
    if amazon.is_none() {
        warn!(
            target = "rastro.api",
            "RAINFOREST_API_KEY not set, search endpoints will answer 503"
        );
    }
    let llm = Arc::new(LlmClient::from_env());

    let runtime = TaskRuntime {
        store: products.clone(),
        publish: PublishConfig::from_env(),
    };
    let (queue, _workers) = JobQueue::spawn(
        tasks::registry(runtime),
        JobHooks::default(),
        JobQueueConfig::from_env(),
    );

    let openapi_raw = include_str!("../docs/openapi.yaml");
    let openapi: serde_json::Value =
        serde_yaml::from_str(openapi_raw).unwrap_or(serde_json::json!({"openapi": "3.0.3"}));
    let prometheus_handle = PrometheusBuilder::new().install_recorder()?;
    let redis = std::env::var("REDIS_URL")
        .ok()
        .and_then(|url| redis::Client::open(url).ok());

    let state = AppState {
        products,
        media,
        amazon,
        llm,
        queue,
        openapi: Arc::new(openapi),
        idempotency: Arc::new(Mutex::new(HashMap::new())),
        prometheus_handle,
        redis,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let protected = Router::new()
        .route("/search", get(search_products))
        .route("/search/by-image", post(search_by_image))
        .route("/products", post(upload_product).get(list_products))
        .route("/products/{id}", get(get_product).delete(delete_product))
        .route("/products/{id}/status", patch(update_product_status))
        .route("/products/{id}/photos/{filename}", get(get_product_photo))
        .route("/jobs", post(submit_job))
        .route("/jobs/{id}", get(get_job_status))
        .route_layer(middleware::from_fn_with_state(auth_state, require_api_auth));

    let app = Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/openapi.json", get(openapi_json))
        .route("/docs", get(swagger_ui))
        .merge(protected)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(body_limit_from_env()))
        .with_state(state);

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8000);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(target = "rastro.api", "listening on {addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

#[derive(Clone)]
struct AppState {
    products: ProductStore,
    media: MediaStore,
    amazon: Option<Arc<AmazonClient>>,
    llm: Arc<LlmClient>,
    queue: JobQueue,
    openapi: Arc<serde_json::Value>,
    idempotency: Arc<Mutex<HashMap<String, UploadResponse>>>,
    prometheus_handle: PrometheusHandle,
    redis: Option<redis::Client>,
}

#[derive(Debug)]
enum AppError {
    Validation { code: &'static str, detail: String },
    Forbidden { code: &'static str, detail: String },
    NotFound { code: &'static str, detail: String },
    Upstream { code: &'static str, detail: String },
    Unavailable { code: &'static str, detail: String },
    Internal { code: &'static str, detail: String },
}

impl AppError {
    fn validation(code: &'static str, detail: impl Into<String>) -> Self {
        AppError::Validation {
            code,
            detail: detail.into(),
        }
    }

    fn forbidden(code: &'static str, detail: impl Into<String>) -> Self {
        AppError::Forbidden {
            code,
            detail: detail.into(),
        }
    }

    fn not_found(code: &'static str, detail: impl Into<String>) -> Self {
        AppError::NotFound {
            code,
            detail: detail.into(),
        }
    }

    fn upstream(code: &'static str, detail: impl Into<String>) -> Self {
        AppError::Upstream {
            code,
            detail: detail.into(),
        }
    }

    fn unavailable(code: &'static str, detail: impl Into<String>) -> Self {
        AppError::Unavailable {
            code,
            detail: detail.into(),
        }
    }

    fn internal(code: &'static str, detail: impl Into<String>) -> Self {
        AppError::Internal {
            code,
            detail: detail.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, detail) = match self {
            AppError::Validation { code, detail } => (StatusCode::BAD_REQUEST, code, detail),
            AppError::Forbidden { code, detail } => (StatusCode::FORBIDDEN, code, detail),
            AppError::NotFound { code, detail } => (StatusCode::NOT_FOUND, code, detail),
            AppError::Upstream { code, detail } => (StatusCode::BAD_GATEWAY, code, detail),
            AppError::Unavailable { code, detail } => (StatusCode::SERVICE_UNAVAILABLE, code, detail),
            AppError::Internal { code, detail } => (StatusCode::INTERNAL_SERVER_ERROR, code, detail),
        };
        (
            status,
            Json(ApiError {
                error: code.to_string(),
                detail: Some(detail),
            }),
        )
            .into_response()
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => {
                AppError::not_found("product_not_found", format!("product {id} not found"))
            }
            StoreError::Io(detail) => AppError::internal("storage_io", detail),
            StoreError::Corrupt(detail) => AppError::internal("record_corrupt", detail),
        }
    }
}

impl From<MediaError> for AppError {
    fn from(err: MediaError) -> Self {
        match err {
            MediaError::NotFound(name) => {
                AppError::not_found("photo_not_found", format!("photo {name} not found"))
            }
            MediaError::InvalidFilename(name) => AppError::validation(
                "invalid_photo_filename",
                format!("filename {name} is not allowed"),
            ),
            MediaError::Io(detail) => AppError::internal("media_io", detail),
        }
    }
}

/// Health check endpoint, also used by deploy scripts to wait for boot.
async fn health() -> Json<serde_json::Value> {
    Json(json!({"status": "ok", "service": "rastro-api"}))
}

async fn metrics_endpoint(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Ok(expected) = std::env::var("METRICS_KEY")
        && !expected.is_empty()
    {
        let provided = headers
            .get("X-Metrics-Key")
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();
        if provided != expected {
            return (
                StatusCode::UNAUTHORIZED,
                Json(ApiError {
                    error: "unauthorized".to_string(),
                    detail: Some("metrics key required".to_string()),
                }),
            )
                .into_response();
        }
    }
    let body = state.prometheus_handle.render();
    Response::builder()
        .header(header::CONTENT_TYPE, "text/plain; version=0.0.4")
        .body(Body::from(body))
        .unwrap()
}

async fn openapi_json(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Ok(expected) = std::env::var("OPENAPI_KEY")
        && !expected.is_empty()
    {
        let provided = headers
            .get("X-Docs-Key")
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();
        if provided != expected {
            return (
                StatusCode::UNAUTHORIZED,
                Json(ApiError {
                    error: "unauthorized".to_string(),
                    detail: Some("docs key required".to_string()),
                }),
            )
                .into_response();
        }
    }
    Json(state.openapi.as_ref().clone()).into_response()
}

async fn swagger_ui() -> Html<&'static str> {
    Html(
        r##"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="utf-8" />
  <title>Rastro API</title>
  <link rel="stylesheet" href="https://unpkg.com/swagger-ui-dist@5/swagger-ui.css" />
</head>
<body>
  <div id="swagger-ui"></div>
  <script src="https://unpkg.com/swagger-ui-dist@5/swagger-ui-bundle.js"></script>
  <script>
    window.onload = () => {
      window.ui = SwaggerUIBundle({ url: "/openapi.json", dom_id: "#swagger-ui" });
    };
  </script>
</body>
</html>"##,
    )
}

#[derive(Debug, Deserialize)]
struct SearchParams {
    query: String,
}

/// Text search against the source marketplace. Returns the best match with
/// full details, or 404 when nothing usable comes back.
async fn search_products(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<serde_json::Value>, AppError> {
    metrics::inc_requests("search");
    let query = params.query.trim();
    if query.chars().count() < 3 {
        return Err(AppError::validation(
            "query_too_short",
            "search needs at least 3 characters",
        ));
    }
    let Some(amazon) = &state.amazon else {
        return Err(AppError::unavailable(
            "search_unconfigured",
            "product search is not configured",
        ));
    };
    let Some(product) = amazon.search_one(query).await else {
        return Err(AppError::not_found(
            "product_not_found",
            format!("no product found for '{query}'"),
        ));
    };
    Ok(Json(json!({"query": query, "product": product})))
}

/// Vision-assisted search: the uploaded photo is turned into a text query,
/// then searched like the plain endpoint.
async fn search_by_image(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<serde_json::Value>, AppError> {
    metrics::inc_requests("search_by_image");
    let Some(amazon) = &state.amazon else {
        return Err(AppError::unavailable(
            "search_unconfigured",
            "product search is not configured",
        ));
    };

    let mut image: Option<(String, Vec<u8>)> = None;
    while let Some(field) = multipart.next_field().await.map_err(bad_multipart)? {
        if field.name() == Some("file") {
            let content_type = field.content_type().unwrap_or_default().to_string();
            let bytes = field.bytes().await.map_err(bad_multipart)?;
            image = Some((content_type, bytes.to_vec()));
        }
    }
    let Some((content_type, bytes)) = image else {
        return Err(AppError::validation(
            "missing_file",
            "multipart field 'file' is required",
        ));
    };
    if !content_type.starts_with("image/") || bytes.is_empty() {
        return Err(AppError::validation(
            "invalid_image",
            "file must be a non-empty image",
        ));
    }

    let query = state
        .llm
        .identify_search_query(&bytes, &content_type)
        .await
        .map_err(|err| AppError::upstream("vision_failed", err.to_string()))?;
    info!(target = "rastro.api", %query, "image identified");

    let hits = amazon.search_many(&query, IMAGE_SEARCH_ALTERNATIVES).await;
    let Some(first) = hits.first().cloned() else {
        return Err(AppError::not_found(
            "product_not_found",
            format!("no product found for '{query}'"),
        ));
    };
    let product = amazon.enrich(first).await;

    Ok(Json(json!({
        "identified_query": query,
        "search_method": "image",
        "product": product,
        "products": hits,
    })))
}

/// Accepts the operator's condition report plus photos, prices the item,
/// writes the record and queues the listing preparation job.
async fn upload_product(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResponse>), AppError> {
    metrics::inc_requests("upload_product");

    let idempotency_key = headers
        .get("Idempotency-Key")
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty());

    if let Some(key) = &idempotency_key {
        if let Some(client) = &state.redis {
            if let Some(existing) = idempotency::redis_get(client, key).await {
                return Ok((StatusCode::OK, Json(existing)));
            }
        } else if let Some(existing) = state.idempotency.lock().await.get(key).cloned() {
            return Ok((StatusCode::OK, Json(existing)));
        }
    }

    let upload = validate_upload(collect_upload_form(multipart).await?)?;
    let quote = pricing::quote(upload.source_price);
    let product_id = Uuid::new_v4();

    let photos = state.media.save_photos(product_id, &upload.photos).await?;

    let description = match state
        .llm
        .optimize_description(&upload.source_description, &upload.defects)
        .await
    {
        Ok(text) => text,
        Err(err) => {
            warn!(
                target = "rastro.api",
                %product_id,
                error = %err,
                "listing copy fell back to the source description"
            );
            upload.source_description.clone()
        }
    };

    let record = ProductRecord {
        schema_version: CURRENT_SCHEMA_VERSION,
        product_id,
        created_at: Utc::now(),
        source: SourceData {
            title: upload.title.clone(),
            price: upload.source_price,
            description: upload.source_description,
            image_url: upload.source_image_url,
            url: upload.source_url,
        },
        condition: ConditionData {
            defects: upload.defects,
            photos: photos.clone(),
        },
        listing: ListingData {
            title: upload.title,
            description,
            price: quote.resale_price,
        },
        pricing: quote,
        status: ProductStatus::Reviewed,
        prepared_by_job: None,
    };
    state.products.insert(&record).await?;

    let job_id = state
        .queue
        .submit(TASK_PREPARE_LISTING, json!({"product_id": product_id}))
        .await
        .map_err(submit_error)?;
    info!(
        target = "rastro.api",
        %product_id,
        %job_id,
        operator = %context.operator_id,
        photos = photos.len(),
        "product uploaded"
    );

    let response = UploadResponse {
        product_id,
        job_id,
        pricing: PricingSummary {
            source_price: quote.source_price,
            resale_price: quote.resale_price,
            savings: quote.savings(),
        },
        photos_uploaded: photos.len(),
    };

    if let Some(key) = idempotency_key {
        if let Some(client) = &state.redis {
            idempotency::redis_set(client, &key, &response, idempotency::ttl_from_env()).await;
        } else {
            state
                .idempotency
                .lock()
                .await
                .insert(key, response.clone());
        }
    }

    Ok((StatusCode::CREATED, Json(response)))
}

#[derive(Debug, Deserialize)]
struct ListParams {
    search: Option<String>,
    date_from: Option<DateTime<Utc>>,
    date_to: Option<DateTime<Utc>>,
    skip: Option<usize>,
    limit: Option<usize>,
}

async fn list_products(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<ProductListResponse>, AppError> {
    let filter = ProductFilter {
        search: params.search.filter(|s| !s.trim().is_empty()),
        date_from: params.date_from,
        date_to: params.date_to,
        skip: params.skip.unwrap_or(0),
        limit: params
            .limit
            .unwrap_or(store::DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE),
    };
    let page = state.products.list(&filter).await?;
    let products = page.products.iter().map(ProductSummary::from_record).collect();
    Ok(Json(ProductListResponse {
        total: page.total,
        products,
    }))
}

async fn get_product(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ProductSummary>, AppError> {
    let product_id = parse_product_id(&id)?;
    let record = state.products.load(product_id).await?;
    Ok(Json(ProductSummary::from_record(&record)))
}

/// Removes the record and its photos. Restricted to operator keys so seller
/// dashboards cannot destroy inventory.
async fn delete_product(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    metrics::inc_requests("delete_product");
    if context.role != OperatorRole::Operator {
        return Err(AppError::forbidden(
            "operator_required",
            "only operator keys may delete products",
        ));
    }
    let product_id = parse_product_id(&id)?;
    state.products.delete(product_id).await?;
    info!(
        target = "rastro.api",
        %product_id,
        operator = %context.operator_id,
        "product deleted"
    );
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct StatusUpdateRequest {
    status: String,
}

async fn update_product_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<StatusUpdateRequest>,
) -> Result<Json<ProductSummary>, AppError> {
    metrics::inc_requests("update_status");
    let product_id = parse_product_id(&id)?;
    let Some(next) = ProductStatus::parse(&payload.status) else {
        return Err(AppError::validation(
            "unknown_status",
            format!("'{}' is not a product status", payload.status),
        ));
    };
    let mut record = state.products.load(product_id).await?;
    if !record.status.can_transition(next) {
        return Err(AppError::validation(
            "invalid_status_transition",
            format!(
                "cannot move from {} to {}",
                record.status.as_str(),
                next.as_str()
            ),
        ));
    }
    record.status = next;
    state.products.save(&record).await?;
    info!(
        target = "rastro.api",
        %product_id,
        status = next.as_str(),
        "status updated"
    );
    Ok(Json(ProductSummary::from_record(&record)))
}

async fn get_product_photo(
    State(state): State<AppState>,
    Path((id, filename)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let product_id = parse_product_id(&id)?;
    let bytes = state.media.read_photo(product_id, &filename).await?;
    Ok(Response::builder()
        .header(header::CONTENT_TYPE, media::content_type_for(&filename))
        .body(Body::from(bytes))
        .unwrap())
}

#[derive(Debug, Deserialize)]
struct SubmitJobRequest {
    task: String,
    #[serde(default)]
    payload: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct EnqueueResponse {
    job_id: Uuid,
}

async fn submit_job(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Json(request): Json<SubmitJobRequest>,
) -> Result<(StatusCode, Json<EnqueueResponse>), AppError> {
    metrics::inc_requests("submit_job");
    let job_id = state
        .queue
        .submit(&request.task, request.payload)
        .await
        .map_err(|err| match err {
            SubmitError::UnknownTask(name) => AppError::validation(
                "unknown_task",
                format!(
                    "task '{name}' is not registered; known tasks: {}",
                    state.queue.task_names().join(", ")
                ),
            ),
            SubmitError::QueueClosed => {
                AppError::unavailable("queue_closed", "job workers are not running")
            }
        })?;
    info!(
        target = "rastro.api",
        %job_id,
        task = %request.task,
        operator = %context.operator_id,
        "job submitted"
    );
    Ok((StatusCode::ACCEPTED, Json(EnqueueResponse { job_id })))
}

async fn get_job_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JobStatus>, AppError> {
    let Ok(job_id) = Uuid::parse_str(&id) else {
        return Err(AppError::validation(
            "invalid_job_id",
            format!("'{id}' is not a valid job id"),
        ));
    };
    let status = state.queue.status(job_id);
    if status.is_unknown() {
        return Err(AppError::not_found(
            "job_not_found",
            format!("job {job_id} is not known to this instance"),
        ));
    }
    Ok(Json(status))
}

fn parse_product_id(raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw).map_err(|_| {
        AppError::validation(
            "invalid_product_id",
            format!("'{raw}' is not a valid product id"),
        )
    })
}

fn bad_multipart(err: MultipartError) -> AppError {
    AppError::validation("invalid_multipart", err.to_string())
}

fn submit_error(err: SubmitError) -> AppError {
    match err {
        SubmitError::UnknownTask(name) => {
            AppError::validation("unknown_task", format!("task {name} is not registered"))
        }
        SubmitError::QueueClosed => {
            AppError::unavailable("queue_closed", "job workers are not running")
        }
    }
}

#[derive(Debug, Default)]
struct UploadForm {
    title: Option<String>,
    source_price: Option<String>,
    source_description: Option<String>,
    defects_description: Option<String>,
    source_image_url: Option<String>,
    source_url: Option<String>,
    photos: Vec<PhotoUpload>,
}

#[derive(Debug)]
struct ValidUpload {
    title: String,
    source_price: f64,
    source_description: String,
    defects: String,
    source_image_url: Option<String>,
    source_url: Option<String>,
    photos: Vec<PhotoUpload>,
}

async fn collect_upload_form(mut multipart: Multipart) -> Result<UploadForm, AppError> {
    let mut form = UploadForm::default();
    while let Some(field) = multipart.next_field().await.map_err(bad_multipart)? {
        match field.name().unwrap_or_default() {
            "title" => form.title = Some(read_text(field).await?),
            "source_price" => form.source_price = Some(read_text(field).await?),
            "source_description" => form.source_description = Some(read_text(field).await?),
            "defects_description" => form.defects_description = Some(read_text(field).await?),
            "source_image_url" => form.source_image_url = Some(read_text(field).await?),
            "source_url" => form.source_url = Some(read_text(field).await?),
            "photos" => {
                let filename = field.file_name().map(|name| name.to_string());
                let bytes = field.bytes().await.map_err(bad_multipart)?;
                form.photos.push(PhotoUpload {
                    filename,
                    bytes: bytes.to_vec(),
                });
            }
            _ => {}
        }
    }
    Ok(form)
}

async fn read_text(field: Field<'_>) -> Result<String, AppError> {
    field.text().await.map_err(bad_multipart)
}

fn validate_upload(form: UploadForm) -> Result<ValidUpload, AppError> {
    let title = form
        .title
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::validation("missing_title", "title is required"))?;
    let source_price = form
        .source_price
        .and_then(|p| p.trim().parse::<f64>().ok())
        .filter(|p| p.is_finite() && *p > 0.0)
        .ok_or_else(|| {
            AppError::validation("invalid_price", "source_price must be a positive number")
        })?;
    let source_description = form
        .source_description
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty())
        .ok_or_else(|| {
            AppError::validation("missing_description", "source_description is required")
        })?;
    if form.photos.is_empty() {
        return Err(AppError::validation(
            "missing_photos",
            "at least one photo is required",
        ));
    }
    let max_photos = media::max_photos_allowed();
    if form.photos.len() > max_photos {
        return Err(AppError::validation(
            "too_many_photos",
            format!("at most {max_photos} photos are accepted"),
        ));
    }
    Ok(ValidUpload {
        title,
        source_price,
        source_description,
        defects: form
            .defects_description
            .map(|d| d.trim().to_string())
            .unwrap_or_default(),
        source_image_url: form.source_image_url.filter(|u| !u.trim().is_empty()),
        source_url: form.source_url.filter(|u| !u.trim().is_empty()),
        photos: form.photos,
    })
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let _ = fmt().with_env_filter(filter).try_init();
}

fn body_limit_from_env() -> usize {
    // Sized for a handful of phone photos in one multipart request.
    std::env::var("REQUEST_MAX_BYTES")
        .ok()
        .and_then(|value| value.parse().ok())
        .filter(|bytes| *bytes > 0)
        .unwrap_or(25 * 1024 * 1024)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn photo(name: &str) -> PhotoUpload {
        PhotoUpload {
            filename: Some(name.to_string()),
            bytes: vec![0xFF, 0xD8],
        }
    }

    fn complete_form() -> UploadForm {
        UploadForm {
            title: Some("Lámpara de pie".to_string()),
            source_price: Some("120.00".to_string()),
            source_description: Some("Floor lamp, warm light".to_string()),
            defects_description: Some("small scratch on the base".to_string()),
            source_image_url: Some("https://example.com/lamp.jpg".to_string()),
            source_url: None,
            photos: vec![photo("front.jpg")],
        }
    }

    fn validation_code(err: AppError) -> &'static str {
        match err {
            AppError::Validation { code, .. } => code,
            other => panic!("expected a validation error, got {other:?}"),
        }
    }

    #[test]
    fn upload_requires_a_title() {
        let form = UploadForm {
            title: Some("   ".to_string()),
            ..complete_form()
        };
        let err = validate_upload(form).expect_err("blank title must fail");
        assert_eq!(validation_code(err), "missing_title");
    }

    #[test]
    fn upload_rejects_non_positive_prices() {
        for bad in ["0", "-3.5", "abc", "NaN"] {
            let form = UploadForm {
                source_price: Some(bad.to_string()),
                ..complete_form()
            };
            let err = validate_upload(form).expect_err("bad price must fail");
            assert_eq!(validation_code(err), "invalid_price", "price {bad}");
        }
    }

    #[test]
    fn upload_needs_at_least_one_photo() {
        let form = UploadForm {
            photos: Vec::new(),
            ..complete_form()
        };
        let err = validate_upload(form).expect_err("no photos must fail");
        assert_eq!(validation_code(err), "missing_photos");
    }

    #[test]
    fn upload_caps_the_photo_count() {
        let too_many = (0..media::max_photos_allowed() + 1)
            .map(|i| photo(&format!("photo_{i}.jpg")))
            .collect();
        let form = UploadForm {
            photos: too_many,
            ..complete_form()
        };
        let err = validate_upload(form).expect_err("photo flood must fail");
        assert_eq!(validation_code(err), "too_many_photos");
    }

    #[test]
    fn upload_normalizes_optional_fields() {
        let form = UploadForm {
            defects_description: None,
            source_image_url: Some("   ".to_string()),
            ..complete_form()
        };
        let upload = validate_upload(form).expect("form is valid");
        assert_eq!(upload.defects, "");
        assert!(upload.source_image_url.is_none());
        assert_eq!(upload.title, "Lámpara de pie");
        assert!((upload.source_price - 120.0).abs() < f64::EPSILON);
    }

    #[test]
    fn product_ids_must_be_uuids() {
        let err = parse_product_id("not-a-uuid").expect_err("garbage id must fail");
        assert_eq!(validation_code(err), "invalid_product_id");
    }
}
