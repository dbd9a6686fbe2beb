use crate::models::{ProductRecord, ProductStatus, CURRENT_SCHEMA_VERSION};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::{json, Map, Value};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

pub const DEFAULT_PAGE_SIZE: usize = 20;

pub fn data_root_from_env() -> PathBuf {
    std::env::var("DATA_DIR")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("data"))
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("product {0} not found")]
    NotFound(Uuid),
    #[error("storage io: {0}")]
    Io(String),
    #[error("record corrupt: {0}")]
    Corrupt(String),
}

impl From<io::Error> for StoreError {
    fn from(err: io::Error) -> Self {
        StoreError::Io(err.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct ProductFilter {
    pub search: Option<String>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
    pub skip: usize,
    pub limit: usize,
}

impl Default for ProductFilter {
    fn default() -> Self {
        Self {
            search: None,
            date_from: None,
            date_to: None,
            skip: 0,
            limit: DEFAULT_PAGE_SIZE,
        }
    }
}

impl ProductFilter {
    pub fn matches(&self, record: &ProductRecord) -> bool {
        if let Some(needle) = &self.search {
            let needle = needle.to_lowercase();
            let in_source = record.source.title.to_lowercase().contains(&needle);
            let in_listing = record.listing.title.to_lowercase().contains(&needle);
            if !in_source && !in_listing {
                return false;
            }
        }
        if let Some(from) = self.date_from
            && record.created_at < from
        {
            return false;
        }
        if let Some(to) = self.date_to
            && record.created_at > to
        {
            return false;
        }
        true
    }
}

#[derive(Debug)]
pub struct ProductPage {
    pub total: usize,
    pub products: Vec<ProductRecord>,
}

/// One directory per product under `{root}/items/{id}`, with the canonical
/// document at `metadata.json` next to its photos.
#[derive(Clone)]
pub struct ProductStore {
    root: PathBuf,
}

impl ProductStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn items_root(&self) -> PathBuf {
        self.root.join("items")
    }

    fn product_dir(&self, product_id: Uuid) -> PathBuf {
        self.items_root().join(product_id.to_string())
    }

    fn record_path(&self, product_id: Uuid) -> PathBuf {
        self.product_dir(product_id).join("metadata.json")
    }

    pub async fn insert(&self, record: &ProductRecord) -> Result<(), StoreError> {
        fs::create_dir_all(self.product_dir(record.product_id)).await?;
        self.write_record(record).await
    }

    /// Overwrites an existing record. Refuses to resurrect a deleted one.
    pub async fn save(&self, record: &ProductRecord) -> Result<(), StoreError> {
        if !fs::try_exists(self.record_path(record.product_id)).await? {
            return Err(StoreError::NotFound(record.product_id));
        }
        self.write_record(record).await
    }

    pub async fn load(&self, product_id: Uuid) -> Result<ProductRecord, StoreError> {
        let dir = self.product_dir(product_id);
        let raw = match fs::read(self.record_path(product_id)).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(product_id));
            }
            Err(err) => return Err(err.into()),
        };
        let doc: Value =
            serde_json::from_slice(&raw).map_err(|err| StoreError::Corrupt(err.to_string()))?;
        let (mut record, upgraded) = normalize_document(doc, &dir)?;
        if upgraded {
            backfill_photo_sizes(&mut record).await;
            match self.write_record(&record).await {
                Ok(()) => {
                    debug!(target = "rastro.store", %product_id, "record upgraded to current schema")
                }
                Err(err) => {
                    warn!(target = "rastro.store", %product_id, error = %err, "failed to persist upgraded record")
                }
            }
        }
        Ok(record)
    }

    pub async fn delete(&self, product_id: Uuid) -> Result<(), StoreError> {
        match fs::remove_dir_all(self.product_dir(product_id)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(product_id))
            }
            Err(err) => Err(err.into()),
        }
    }

    pub async fn list(&self, filter: &ProductFilter) -> Result<ProductPage, StoreError> {
        let mut entries = match fs::read_dir(self.items_root()).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Ok(ProductPage {
                    total: 0,
                    products: Vec::new(),
                });
            }
            Err(err) => return Err(err.into()),
        };
        let mut records = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Ok(product_id) = Uuid::parse_str(&name.to_string_lossy()) else {
                continue;
            };
            match self.load(product_id).await {
                Ok(record) => {
                    if filter.matches(&record) {
                        records.push(record);
                    }
                }
                Err(err) => {
                    warn!(target = "rastro.store", %product_id, error = %err, "skipping unreadable record");
                }
            }
        }
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let total = records.len();
        let products = records
            .into_iter()
            .skip(filter.skip)
            .take(filter.limit)
            .collect();
        Ok(ProductPage { total, products })
    }

    async fn write_record(&self, record: &ProductRecord) -> Result<(), StoreError> {
        let body =
            serde_json::to_vec_pretty(record).map_err(|err| StoreError::Corrupt(err.to_string()))?;
        fs::write(self.record_path(record.product_id), body).await?;
        Ok(())
    }
}

/// Parses a document of any known schema version into the current record
/// shape. Returns whether an upgrade happened so the caller can write back.
fn normalize_document(doc: Value, dir: &Path) -> Result<(ProductRecord, bool), StoreError> {
    let version = doc
        .get("schema_version")
        .and_then(Value::as_u64)
        .unwrap_or(1);
    if version >= CURRENT_SCHEMA_VERSION as u64 {
        let record =
            serde_json::from_value(doc).map_err(|err| StoreError::Corrupt(err.to_string()))?;
        return Ok((record, false));
    }
    let upgraded = upgrade_v1(doc, dir)?;
    let record =
        serde_json::from_value(upgraded).map_err(|err| StoreError::Corrupt(err.to_string()))?;
    Ok((record, true))
}

fn upgrade_v1(doc: Value, dir: &Path) -> Result<Value, StoreError> {
    let Value::Object(mut map) = doc else {
        return Err(StoreError::Corrupt("record is not a JSON object".to_string()));
    };

    let product_id = map
        .remove("product_id")
        .or_else(|| map.remove("id"))
        .unwrap_or(Value::Null);
    let created_at = normalize_timestamp(map.remove("created_at"));

    let source = take_object(&mut map, "amazon_data");

    let mut condition = take_object(&mut map, "real_condition");
    rename_key(&mut condition, "defects_description", "defects");
    let photos = normalize_photos(condition.remove("photos"), dir);
    condition.insert("photos".to_string(), photos);

    let mut listing = take_object(&mut map, "wallapop_listing");
    rename_key(&mut listing, "optimized_description", "description");

    let mut pricing = take_object(&mut map, "pricing");
    rename_key(&mut pricing, "amazon_price", "source_price");
    rename_key(&mut pricing, "wallapop_price", "resale_price");
    rename_key(&mut pricing, "discount_percentage", "discount_percent");

    let status = map
        .remove("status")
        .and_then(|v| v.as_str().and_then(ProductStatus::parse_lenient))
        .unwrap_or(ProductStatus::Reviewed);

    let mut out = Map::new();
    out.insert("schema_version".to_string(), json!(CURRENT_SCHEMA_VERSION));
    out.insert("product_id".to_string(), product_id);
    out.insert("created_at".to_string(), json!(created_at.to_rfc3339()));
    out.insert("source".to_string(), Value::Object(source));
    out.insert("condition".to_string(), Value::Object(condition));
    out.insert("listing".to_string(), Value::Object(listing));
    out.insert("pricing".to_string(), Value::Object(pricing));
    out.insert("status".to_string(), json!(status.as_str()));
    if let Some(job_id) = map
        .remove("celery_task_id")
        .and_then(|v| v.as_str().and_then(|s| Uuid::parse_str(s).ok()))
    {
        out.insert("prepared_by_job".to_string(), json!(job_id));
    }
    Ok(Value::Object(out))
}

/// Old documents carry naive local timestamps without an offset. Reads both
/// forms, treating naive values as UTC.
fn normalize_timestamp(value: Option<Value>) -> DateTime<Utc> {
    let Some(raw) = value.as_ref().and_then(|v| v.as_str()) else {
        return Utc::now();
    };
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return parsed.with_timezone(&Utc);
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return DateTime::from_naive_utc_and_offset(naive, Utc);
    }
    Utc::now()
}

/// The oldest documents stored photos as bare filenames. Sizes are filled in
/// later from the filesystem, after the async boundary.
fn normalize_photos(photos: Option<Value>, dir: &Path) -> Value {
    let Some(Value::Array(entries)) = photos else {
        return json!([]);
    };
    let normalized: Vec<Value> = entries
        .into_iter()
        .filter_map(|entry| match entry {
            Value::String(filename) => {
                let path = dir.join(&filename);
                Some(json!({
                    "filename": filename,
                    "path": path.to_string_lossy(),
                    "size_bytes": 0,
                }))
            }
            Value::Object(photo) => Some(Value::Object(photo)),
            _ => None,
        })
        .collect();
    Value::Array(normalized)
}

async fn backfill_photo_sizes(record: &mut ProductRecord) {
    for photo in &mut record.condition.photos {
        if photo.size_bytes == 0
            && let Ok(meta) = fs::metadata(&photo.path).await
        {
            photo.size_bytes = meta.len();
        }
    }
}

fn take_object(map: &mut Map<String, Value>, key: &str) -> Map<String, Value> {
    match map.remove(key) {
        Some(Value::Object(inner)) => inner,
        _ => Map::new(),
    }
}

fn rename_key(map: &mut Map<String, Value>, from: &str, to: &str) {
    if let Some(value) = map.remove(from) {
        map.insert(to.to_string(), value);
    }
}
