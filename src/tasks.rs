use crate::{
    jobs::{TaskContext, TaskError, TaskRegistry, TaskResult},
    metrics,
    models::ProductStatus,
    store::{ProductStore, StoreError},
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::{sync::Arc, time::Duration};
use tokio::time::{sleep, Instant};
use tracing::info;
use uuid::Uuid;

pub const TASK_PREPARE_LISTING: &str = "prepare_listing";
pub const TASK_PUBLISH_PRODUCT: &str = "publish_product";
pub const TASK_PING: &str = "ping";

/// The manual publish flow, in the order an operator works through it.
pub const PUBLISH_STEPS: [&str; 5] = [
    "preparing",
    "authenticating",
    "uploading images",
    "filling form",
    "publishing",
];

#[derive(Debug, Clone)]
pub struct PublishConfig {
    pub step_delay: Duration,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            step_delay: Duration::from_secs(2),
        }
    }
}

impl PublishConfig {
    pub fn from_env() -> Self {
        Self {
            step_delay: step_delay_from_env(),
        }
    }
}

/// Everything the registered tasks need at run time.
#[derive(Clone)]
pub struct TaskRuntime {
    pub store: ProductStore,
    pub publish: PublishConfig,
}

pub fn registry(runtime: TaskRuntime) -> TaskRegistry {
    let mut registry = TaskRegistry::new();

    let store = runtime.store.clone();
    registry.register(
        TASK_PREPARE_LISTING,
        Arc::new(move |context, payload| {
            let store = store.clone();
            Box::pin(async move { prepare_listing(context, payload, &store).await })
        }),
    );

    let publish = runtime.publish.clone();
    registry.register(
        TASK_PUBLISH_PRODUCT,
        Arc::new(move |context, payload| {
            let publish = publish.clone();
            Box::pin(async move { publish_product(context, payload, &publish).await })
        }),
    );

    registry.register(
        TASK_PING,
        Arc::new(|context, _payload| Box::pin(async move { ping(context).await })),
    );

    registry
}

#[derive(Debug, Deserialize)]
struct PreparePayload {
    product_id: Uuid,
}

/// Stamps a stored product as ready for upload and reports the listing
/// essentials back through the job result.
async fn prepare_listing(
    context: TaskContext,
    payload: Value,
    store: &ProductStore,
) -> TaskResult {
    let payload: PreparePayload = serde_json::from_value(payload)
        .map_err(|err| TaskError::invalid_payload(format!("prepare_listing payload: {err}")))?;

    let mut record = store
        .load(payload.product_id)
        .await
        .map_err(task_error_from_store)?;

    context.progress.report("loading record", &record.listing.title, 50);

    record.status = ProductStatus::ReadyForUpload;
    record.prepared_by_job = Some(context.job_id);
    store.save(&record).await.map_err(task_error_from_store)?;

    context.progress.report("ready", &record.listing.title, 100);

    Ok(json!({
        "status": "ready",
        "product_id": record.product_id,
        "title": record.listing.title,
        "price": record.listing.price,
        "photos": record.condition.photos.len(),
        "message": format!(
            "Ready to publish: {} at {}€",
            record.listing.title, record.listing.price
        ),
    }))
}

#[derive(Debug, Deserialize)]
struct PublishPayload {
    product_id: String,
    #[serde(default)]
    product: Value,
    #[serde(default)]
    images: Vec<String>,
}

/// Walks the publish flow step by step, reporting progress after each one.
/// Until a marketplace grants API access this is a paced walkthrough the
/// operator follows live.
async fn publish_product(
    context: TaskContext,
    payload: Value,
    config: &PublishConfig,
) -> TaskResult {
    let payload: PublishPayload = serde_json::from_value(payload)
        .map_err(|err| TaskError::invalid_payload(format!("publish_product payload: {err}")))?;

    let product_name = payload
        .product
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or("unnamed product")
        .to_string();

    let total = PUBLISH_STEPS.len();
    for (index, step) in PUBLISH_STEPS.iter().enumerate() {
        let started = Instant::now();
        sleep(config.step_delay).await;
        let percent = (((index + 1) as f64 / total as f64) * 100.0).round() as u8;
        context.progress.report(step, &product_name, percent);
        metrics::step_elapsed(step, started.elapsed().as_millis());
    }

    info!(
        target = "rastro.tasks",
        job_id = %context.job_id,
        product_id = %payload.product_id,
        "publish walkthrough finished"
    );

    Ok(json!({
        "status": "success",
        "product_id": payload.product_id,
        "product_name": product_name,
        "images_processed": payload.images.len(),
        "message": format!("Product '{product_name}' processed successfully"),
    }))
}

/// Smoke-test task for checking the queue end to end.
async fn ping(context: TaskContext) -> TaskResult {
    sleep(Duration::from_millis(100)).await;
    Ok(json!({
        "status": "success",
        "message": format!("pong from job {}", context.job_id),
    }))
}

fn task_error_from_store(err: StoreError) -> TaskError {
    match err {
        StoreError::NotFound(id) => TaskError::not_found(format!("product {id} not found")),
        StoreError::Io(detail) => TaskError::storage(detail),
        StoreError::Corrupt(detail) => TaskError::storage(detail),
    }
}

fn step_delay_from_env() -> Duration {
    std::env::var("PUBLISH_STEP_DELAY_MS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or_else(|| Duration::from_secs(2))
}
