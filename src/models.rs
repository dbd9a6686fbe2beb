use crate::pricing::ResaleQuote;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::collections::HashMap;
use uuid::Uuid;

/// Schema stamped into every record this build writes. Older documents are
/// upgraded on read in `store::load`.
pub const CURRENT_SCHEMA_VERSION: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductStatus {
    Reviewed,
    ReadyForUpload,
    Published,
    Sold,
    Failed,
}

static TRANSITIONS: Lazy<HashMap<ProductStatus, &'static [ProductStatus]>> = Lazy::new(|| {
    use ProductStatus::*;
    HashMap::from([
        (Reviewed, &[ReadyForUpload, Failed][..]),
        (ReadyForUpload, &[Published, Failed][..]),
        (Published, &[Sold][..]),
        (Sold, &[][..]),
        (Failed, &[][..]),
    ])
});

impl ProductStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProductStatus::Reviewed => "reviewed",
            ProductStatus::ReadyForUpload => "ready_for_upload",
            ProductStatus::Published => "published",
            ProductStatus::Sold => "sold",
            ProductStatus::Failed => "failed",
        }
    }

    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_lowercase().as_str() {
            "reviewed" => Some(ProductStatus::Reviewed),
            "ready_for_upload" => Some(ProductStatus::ReadyForUpload),
            "published" => Some(ProductStatus::Published),
            "sold" => Some(ProductStatus::Sold),
            "failed" => Some(ProductStatus::Failed),
            _ => None,
        }
    }

    /// Also accepts the names older documents were written with, both the
    /// English and the Spanish family.
    pub fn parse_lenient(input: &str) -> Option<Self> {
        Self::parse(input).or_else(|| match input.trim().to_lowercase().as_str() {
            "pending" | "pending_upload" | "revisado" => Some(ProductStatus::Reviewed),
            "uploaded" | "publicado" => Some(ProductStatus::Published),
            "vendido" => Some(ProductStatus::Sold),
            _ => None,
        })
    }

    pub fn can_transition(self, next: ProductStatus) -> bool {
        TRANSITIONS
            .get(&self)
            .map(|allowed| allowed.contains(&next))
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductRecord {
    pub schema_version: u32,
    pub product_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub source: SourceData,
    pub condition: ConditionData,
    pub listing: ListingData,
    pub pricing: ResaleQuote,
    pub status: ProductStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prepared_by_job: Option<Uuid>,
}

/// What the source marketplace said about the item.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceData {
    pub title: String,
    pub price: f64,
    pub description: String,
    pub image_url: Option<String>,
    pub url: Option<String>,
}

/// What the operator observed about the actual unit on the shelf.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionData {
    #[serde(default)]
    pub defects: String,
    pub photos: Vec<PhotoInfo>,
}

/// The listing we intend to publish.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListingData {
    pub title: String,
    pub description: String,
    pub price: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhotoInfo {
    pub filename: String,
    pub path: String,
    #[serde(default)]
    pub size_bytes: u64,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingSummary {
    pub source_price: f64,
    pub resale_price: f64,
    pub savings: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    pub product_id: Uuid,
    pub job_id: Uuid,
    pub pricing: PricingSummary,
    pub photos_uploaded: usize,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
pub struct ProductSummary {
    pub product_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub title: String,
    pub source_price: f64,
    pub resale_price: f64,
    pub discount_percent: f64,
    pub description: String,
    pub defects: String,
    pub photo_count: usize,
    pub photo_urls: Vec<String>,
    pub image_url: Option<String>,
    pub source_url: Option<String>,
    pub status: ProductStatus,
    pub prepared_by_job: Option<Uuid>,
}

impl ProductSummary {
    pub fn from_record(record: &ProductRecord) -> Self {
        let photo_urls = record
            .condition
            .photos
            .iter()
            .map(|photo| {
                format!(
                    "/products/{}/photos/{}",
                    record.product_id,
                    urlencoding::encode(&photo.filename)
                )
            })
            .collect();
        Self {
            product_id: record.product_id,
            created_at: record.created_at,
            title: record.listing.title.clone(),
            source_price: record.pricing.source_price,
            resale_price: record.pricing.resale_price,
            discount_percent: record.pricing.discount_percent,
            description: record.listing.description.clone(),
            defects: record.condition.defects.clone(),
            photo_count: record.condition.photos.len(),
            photo_urls,
            image_url: record.source.image_url.clone(),
            source_url: record.source.url.clone(),
            status: record.status,
            prepared_by_job: record.prepared_by_job,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ProductListResponse {
    pub total: usize,
    pub products: Vec<ProductSummary>,
}
