use crate::http;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::warn;

const FALLBACK_DESCRIPTION: &str = "No description available.";

#[derive(Debug, Clone)]
pub struct AmazonConfig {
    pub api_key: String,
    pub domain: String,
    pub base_url: String,
}

impl AmazonConfig {
    /// Requires `RAINFOREST_API_KEY`; without it the client stays disabled
    /// and search endpoints answer 503.
    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var("RAINFOREST_API_KEY")
            .ok()
            .filter(|v| !v.trim().is_empty())?;
        let domain = std::env::var("AMAZON_DOMAIN")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| "amazon.es".to_string());
        let base_url = std::env::var("RAINFOREST_API_URL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| "https://api.rainforestapi.com/request".to_string());
        Some(Self {
            api_key,
            domain,
            base_url,
        })
    }
}

#[derive(Debug, Error)]
pub enum AmazonError {
    #[error("amazon request failed: {0}")]
    Request(String),
    #[error("amazon response unreadable: {0}")]
    Deserialize(String),
}

/// One row of a search result. Only rows carrying both an ASIN and a price
/// are usable downstream.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
pub struct ProductHit {
    pub asin: String,
    pub title: String,
    pub price: f64,
    pub image: Option<String>,
    pub url: Option<String>,
}

/// A search hit merged with the product detail lookup.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
pub struct ProductCard {
    pub asin: String,
    pub title: String,
    pub price: f64,
    pub description: String,
    pub image_url: Option<String>,
    pub url: Option<String>,
    pub specifications: BTreeMap<String, String>,
}

impl ProductCard {
    fn from_hit(hit: ProductHit) -> Self {
        Self {
            asin: hit.asin,
            title: hit.title,
            price: hit.price,
            description: FALLBACK_DESCRIPTION.to_string(),
            image_url: hit.image,
            url: hit.url,
            specifications: BTreeMap::new(),
        }
    }
}

pub struct AmazonClient {
    http: reqwest::Client,
    config: AmazonConfig,
}

impl AmazonClient {
    pub fn new(config: AmazonConfig) -> Self {
        Self {
            http: http::build_client(),
            config,
        }
    }

    pub fn from_env() -> Option<Self> {
        AmazonConfig::from_env().map(Self::new)
    }

    /// Search degrades to an empty list on upstream trouble so callers can
    /// keep serving.
    pub async fn search_many(&self, query: &str, limit: usize) -> Vec<ProductHit> {
        match self.search(query).await {
            Ok(response) => hits_from_search(response, limit),
            Err(err) => {
                warn!(target = "rastro.amazon", query, error = %err, "search degraded to empty result");
                Vec::new()
            }
        }
    }

    pub async fn search_one(&self, query: &str) -> Option<ProductCard> {
        let hit = self.search_many(query, 1).await.into_iter().next()?;
        Some(self.enrich(hit).await)
    }

    /// Fetches the detail page for a hit. If that lookup fails the card is
    /// built from the search row alone.
    pub async fn enrich(&self, hit: ProductHit) -> ProductCard {
        match self.details(&hit.asin).await {
            Ok(response) => merge_details(hit, response.product),
            Err(err) => {
                warn!(target = "rastro.amazon", asin = %hit.asin, error = %err, "detail lookup failed, keeping search data");
                ProductCard::from_hit(hit)
            }
        }
    }

    async fn search(&self, query: &str) -> Result<SearchResponse, AmazonError> {
        let response = self
            .http
            .get(&self.config.base_url)
            .query(&[
                ("api_key", self.config.api_key.as_str()),
                ("type", "search"),
                ("amazon_domain", self.config.domain.as_str()),
                ("search_term", query),
            ])
            .send()
            .await
            .map_err(|err| AmazonError::Request(err.to_string()))?;
        if !response.status().is_success() {
            return Err(AmazonError::Request(format!(
                "search returned {}",
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|err| AmazonError::Deserialize(err.to_string()))
    }

    async fn details(&self, asin: &str) -> Result<DetailResponse, AmazonError> {
        let response = self
            .http
            .get(&self.config.base_url)
            .query(&[
                ("api_key", self.config.api_key.as_str()),
                ("type", "product"),
                ("amazon_domain", self.config.domain.as_str()),
                ("asin", asin),
            ])
            .send()
            .await
            .map_err(|err| AmazonError::Request(err.to_string()))?;
        if !response.status().is_success() {
            return Err(AmazonError::Request(format!(
                "detail lookup returned {}",
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|err| AmazonError::Deserialize(err.to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    search_results: Vec<SearchResult>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    asin: Option<String>,
    title: Option<String>,
    price: Option<PriceField>,
    image: Option<String>,
    link: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PriceField {
    value: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct DetailResponse {
    product: Option<DetailProduct>,
}

#[derive(Debug, Deserialize)]
struct DetailProduct {
    description: Option<String>,
    feature_bullets_flat: Option<String>,
    buybox_winner: Option<BuyboxWinner>,
    main_image: Option<MainImage>,
    #[serde(default)]
    specifications: Vec<Specification>,
}

#[derive(Debug, Deserialize)]
struct BuyboxWinner {
    price: Option<PriceField>,
}

#[derive(Debug, Deserialize)]
struct MainImage {
    link: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Specification {
    name: Option<String>,
    value: Option<String>,
}

fn hits_from_search(response: SearchResponse, limit: usize) -> Vec<ProductHit> {
    response
        .search_results
        .into_iter()
        .filter_map(hit_from_result)
        .take(limit)
        .collect()
}

fn hit_from_result(result: SearchResult) -> Option<ProductHit> {
    let asin = result.asin?;
    let price = result.price.and_then(|p| p.value)?;
    Some(ProductHit {
        asin,
        title: result.title.unwrap_or_default(),
        price,
        image: result.image,
        url: result.link,
    })
}

fn merge_details(hit: ProductHit, product: Option<DetailProduct>) -> ProductCard {
    let Some(product) = product else {
        return ProductCard::from_hit(hit);
    };
    let description = description_from(&product);
    let price = product
        .buybox_winner
        .and_then(|b| b.price)
        .and_then(|p| p.value)
        .unwrap_or(hit.price);
    let image_url = product.main_image.and_then(|m| m.link).or(hit.image);
    let specifications = product
        .specifications
        .into_iter()
        .filter_map(|spec| Some((spec.name?, spec.value?)))
        .collect();
    ProductCard {
        asin: hit.asin,
        title: hit.title,
        price,
        description,
        image_url,
        url: hit.url,
        specifications,
    }
}

/// Bullets joined into one paragraph, then the long-form description, then a
/// fixed placeholder.
fn description_from(product: &DetailProduct) -> String {
    if let Some(bullets) = product
        .feature_bullets_flat
        .as_deref()
        .filter(|s| !s.trim().is_empty())
    {
        return bullets
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join(". ");
    }
    product
        .description
        .clone()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| FALLBACK_DESCRIPTION.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse_search(value: serde_json::Value) -> SearchResponse {
        serde_json::from_value(value).expect("search payload")
    }

    fn parse_detail(value: serde_json::Value) -> DetailResponse {
        serde_json::from_value(value).expect("detail payload")
    }

    #[test]
    fn search_rows_without_asin_or_price_are_dropped() {
        let response = parse_search(json!({
            "search_results": [
                {"title": "no asin", "price": {"value": 10.0}},
                {"asin": "B000000001", "title": "no price"},
                {"asin": "B000000002", "title": "priceless", "price": {}},
                {"asin": "B000000003", "title": "keeper", "price": {"value": 49.9},
                 "image": "https://img/3.jpg", "link": "https://amazon.es/dp/B000000003"},
                {"asin": "B000000004", "title": "second keeper", "price": {"value": 15.0}},
            ]
        }));
        let hits = hits_from_search(response, 10);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].asin, "B000000003");
        assert_eq!(hits[0].price, 49.9);
        assert_eq!(hits[0].image.as_deref(), Some("https://img/3.jpg"));
        assert_eq!(hits[1].asin, "B000000004");
    }

    #[test]
    fn limit_caps_usable_rows() {
        let response = parse_search(json!({
            "search_results": [
                {"asin": "A", "price": {"value": 1.0}},
                {"asin": "B", "price": {"value": 2.0}},
                {"asin": "C", "price": {"value": 3.0}},
            ]
        }));
        let hits = hits_from_search(response, 2);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[1].asin, "B");
    }

    #[test]
    fn empty_payload_parses_to_no_hits() {
        let response = parse_search(json!({}));
        assert!(hits_from_search(response, 5).is_empty());
    }

    fn sample_hit() -> ProductHit {
        ProductHit {
            asin: "B08KTZ8249".to_string(),
            title: "Kindle Paperwhite".to_string(),
            price: 149.99,
            image: Some("https://img/search.jpg".to_string()),
            url: Some("https://amazon.es/dp/B08KTZ8249".to_string()),
        }
    }

    #[test]
    fn card_prefers_feature_bullets_over_description() {
        let detail = parse_detail(json!({
            "product": {
                "description": "long form text",
                "feature_bullets_flat": "Waterproof\n 300 ppi display \n\nWeeks of battery",
                "buybox_winner": {"price": {"value": 139.99}},
                "main_image": {"link": "https://img/main.jpg"},
                "specifications": [
                    {"name": "Brand", "value": "Amazon"},
                    {"name": "incomplete"},
                ]
            }
        }));
        let card = merge_details(sample_hit(), detail.product);
        assert_eq!(
            card.description,
            "Waterproof. 300 ppi display. Weeks of battery"
        );
        assert_eq!(card.price, 139.99);
        assert_eq!(card.image_url.as_deref(), Some("https://img/main.jpg"));
        assert_eq!(card.specifications.len(), 1);
        assert_eq!(card.specifications["Brand"], "Amazon");
    }

    #[test]
    fn card_falls_back_through_description_tiers() {
        let detail = parse_detail(json!({
            "product": {"description": "only the long form"}
        }));
        let card = merge_details(sample_hit(), detail.product);
        assert_eq!(card.description, "only the long form");
        // buybox absent keeps the search price
        assert_eq!(card.price, 149.99);
        assert_eq!(card.image_url.as_deref(), Some("https://img/search.jpg"));

        let empty = parse_detail(json!({"product": {}}));
        let card = merge_details(sample_hit(), empty.product);
        assert_eq!(card.description, FALLBACK_DESCRIPTION);

        let missing = parse_detail(json!({}));
        let card = merge_details(sample_hit(), missing.product);
        assert_eq!(card.description, FALLBACK_DESCRIPTION);
        assert!(card.specifications.is_empty());
    }
}
