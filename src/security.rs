use crate::models::ApiError;
use axum::{
    Json,
    body::Body,
    extract::State,
    http::{self, Request, StatusCode, header::HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use std::{collections::HashMap, convert::Infallible, env, sync::Arc, time::Instant};
use tokio::sync::Mutex;
use tracing::{info, warn};

#[derive(Clone)]
pub struct AuthState {
    records: Arc<HashMap<String, OperatorRecord>>,
    limiter: Arc<TokenBuckets>,
}

#[derive(Clone, Debug)]
pub struct AuthContext {
    pub operator_id: String,
    pub role: OperatorRole,
    pub api_key_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatorRole {
    Operator,
    Seller,
}

impl OperatorRole {
    /// Accepts the Spanish role names older deployments configured.
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_lowercase().as_str() {
            "operator" | "operario" => Some(OperatorRole::Operator),
            "seller" | "vendedor" => Some(OperatorRole::Seller),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OperatorRole::Operator => "operator",
            OperatorRole::Seller => "seller",
        }
    }
}

#[derive(Clone)]
struct OperatorRecord {
    operator_id: String,
    role: OperatorRole,
    api_key_id: String,
}

impl AuthState {
    pub fn from_env() -> Self {
        let records = Arc::new(load_keys_from_env());
        let limiter = Arc::new(TokenBuckets::from_env());
        Self { records, limiter }
    }

    fn authenticate(&self, presented: &str) -> Option<AuthContext> {
        self.records.get(presented).map(|record| AuthContext {
            operator_id: record.operator_id.clone(),
            role: record.role,
            api_key_id: record.api_key_id.clone(),
        })
    }

    async fn consume(&self, operator_id: &str) -> Result<RatePermit, RateExceeded> {
        self.limiter.consume(operator_id).await
    }
}

pub async fn require_api_auth(
    State(state): State<AuthState>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, Infallible> {
    let Some(presented) = extract_api_key(request.headers()) else {
        let response =
            unauthorized_response("missing_api_key", "Provide X-Rastro-Key or Bearer token");
        return Ok(response);
    };

    let Some(context) = state.authenticate(&presented) else {
        let response = unauthorized_response("invalid_api_key", "Key not recognized");
        return Ok(response);
    };

    match state.consume(&context.operator_id).await {
        Ok(permit) => {
            request.extensions_mut().insert(context.clone());
            let mut response = next.run(request).await;
            permit.apply_headers(response.headers_mut());
            Ok(response)
        }
        Err(exceeded) => {
            let mut response = too_many_requests("rate_limited", "Too many requests");
            exceeded.apply_headers(response.headers_mut());
            Ok(response)
        }
    }
}

fn extract_api_key(headers: &http::HeaderMap) -> Option<String> {
    if let Some(value) = headers.get(http::header::AUTHORIZATION)
        && let Ok(raw) = value.to_str()
        && raw.len() >= 7
        && raw[..6].eq_ignore_ascii_case("bearer")
    {
        return Some(raw[6..].trim().to_string());
    }
    headers
        .get("X-Rastro-Key")
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn unauthorized_response(code: &str, message: &str) -> Response {
    let payload = ApiError {
        error: code.to_string(),
        detail: Some(message.to_string()),
    };
    (StatusCode::UNAUTHORIZED, Json(payload)).into_response()
}

fn too_many_requests(code: &str, message: &str) -> Response {
    let payload = ApiError {
        error: code.to_string(),
        detail: Some(message.to_string()),
    };
    (StatusCode::TOO_MANY_REQUESTS, Json(payload)).into_response()
}

fn load_keys_from_env() -> HashMap<String, OperatorRecord> {
    let raw = env::var("OPS_API_KEYS")
        .unwrap_or_else(|_| "demo-operator:operator:demo-key".to_string());
    let mut entries = parse_keys(&raw);

    if entries.is_empty() {
        warn!(
            target = "rastro.api",
            "OPS_API_KEYS produced no keys; falling back to demo credentials"
        );
        entries.insert(
            "demo-key".to_string(),
            OperatorRecord {
                operator_id: "demo-operator".to_string(),
                role: OperatorRole::Operator,
                api_key_id: "key-01".to_string(),
            },
        );
    } else {
        info!(
            target = "rastro.api",
            key_count = entries.len(),
            "loaded API keys from env"
        );
    }

    entries
}

/// `name:role:key` per entry, comma separated. The older two-part
/// `name:key` form is read as an operator key.
fn parse_keys(raw: &str) -> HashMap<String, OperatorRecord> {
    let mut entries = HashMap::new();
    for (idx, token) in raw.split(',').enumerate() {
        let trimmed = token.trim();
        if trimmed.is_empty() {
            continue;
        }
        let parts: Vec<&str> = trimmed.split(':').map(str::trim).collect();
        let parsed = match parts.as_slice() {
            [name, role, key] if !name.is_empty() && !key.is_empty() => {
                match OperatorRole::parse(role) {
                    Some(role) => Some((key.to_string(), name.to_string(), role)),
                    None => {
                        warn!(
                            target = "rastro.api",
                            "ignored OPS_API_KEYS entry with unknown role: {trimmed}"
                        );
                        continue;
                    }
                }
            }
            [name, key] if !name.is_empty() && !key.is_empty() => {
                Some((key.to_string(), name.to_string(), OperatorRole::Operator))
            }
            _ => None,
        };
        match parsed {
            Some((key, name, role)) => {
                entries.insert(
                    key,
                    OperatorRecord {
                        operator_id: name,
                        role,
                        api_key_id: format!("key-{:02}", idx + 1),
                    },
                );
            }
            None => warn!(
                target = "rastro.api",
                "ignored malformed OPS_API_KEYS entry: {trimmed}"
            ),
        }
    }
    entries
}

#[derive(Clone)]
struct TokenBuckets {
    rate_per_sec: f64,
    capacity: f64,
    buckets: Arc<Mutex<HashMap<String, BucketState>>>,
}

impl TokenBuckets {
    fn from_env() -> Self {
        let rate_per_sec = env::var("RATE_LIMIT_PER_SEC")
            .ok()
            .and_then(|value| value.parse::<f64>().ok())
            .filter(|value| *value > 0.0)
            .unwrap_or(5.0);
        let capacity = env::var("RATE_LIMIT_CAPACITY")
            .ok()
            .and_then(|value| value.parse::<f64>().ok())
            .filter(|value| *value >= 1.0)
            .unwrap_or(10.0);
        Self {
            rate_per_sec,
            capacity,
            buckets: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    async fn consume(&self, key: &str) -> Result<RatePermit, RateExceeded> {
        let mut guard = self.buckets.lock().await;
        let now = Instant::now();
        let state = guard.entry(key.to_string()).or_insert_with(|| BucketState {
            tokens: self.capacity,
            last_refill: now,
        });

        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            state.tokens = (state.tokens + elapsed * self.rate_per_sec).min(self.capacity);
            state.last_refill = now;
        }

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            Ok(RatePermit {
                capacity: self.capacity,
                tokens: state.tokens,
                rate: self.rate_per_sec,
            })
        } else {
            let deficit = 1.0 - state.tokens;
            let retry_after = (deficit / self.rate_per_sec).max(0.0);
            Err(RateExceeded {
                retry_after,
                capacity: self.capacity,
                tokens: state.tokens,
                rate: self.rate_per_sec,
            })
        }
    }
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

#[derive(Debug, Clone, Serialize)]
pub struct RatePermit {
    capacity: f64,
    tokens: f64,
    rate: f64,
}

impl RatePermit {
    fn apply_headers(&self, headers: &mut http::HeaderMap) {
        set_limit_headers(headers, self.capacity, self.tokens, self.rate);
    }
}

#[derive(Debug, Clone)]
pub struct RateExceeded {
    retry_after: f64,
    capacity: f64,
    tokens: f64,
    rate: f64,
}

impl RateExceeded {
    fn apply_headers(&self, headers: &mut http::HeaderMap) {
        let retry = self.retry_after.ceil().max(0.0) as u64;
        headers.insert(
            http::header::RETRY_AFTER,
            HeaderValue::from_str(&retry.to_string())
                .unwrap_or_else(|_| HeaderValue::from_static("1")),
        );
        set_limit_headers(headers, self.capacity, self.tokens, self.rate);
    }
}

fn set_limit_headers(headers: &mut http::HeaderMap, capacity: f64, tokens: f64, rate: f64) {
    let remaining = tokens.max(0.0).floor() as u64;
    let reset = ((capacity - tokens) / rate).ceil().max(0.0) as u64;
    insert_numeric(headers, "X-RateLimit-Limit", capacity as u64);
    insert_numeric(headers, "X-RateLimit-Remaining", remaining);
    insert_numeric(headers, "X-RateLimit-Reset", reset);
}

fn insert_numeric(headers: &mut http::HeaderMap, name: &'static str, value: u64) {
    headers.insert(
        name,
        HeaderValue::from_str(&value.to_string())
            .unwrap_or_else(|_| HeaderValue::from_static("0")),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_parse_roles_and_two_part_entries() {
        let entries = parse_keys(
            "ana:operator:key-a, luis:vendedor:key-b, solo:key-c, bad-entry, x:boss:key-d",
        );
        assert_eq!(entries.len(), 3);
        let ana = &entries["key-a"];
        assert_eq!(ana.operator_id, "ana");
        assert_eq!(ana.role, OperatorRole::Operator);
        assert_eq!(entries["key-b"].role, OperatorRole::Seller);
        let solo = &entries["key-c"];
        assert_eq!(solo.role, OperatorRole::Operator);
        assert_eq!(solo.api_key_id, "key-03");
    }

    #[test]
    fn role_parse_accepts_spanish_aliases() {
        assert_eq!(OperatorRole::parse("OPERARIO"), Some(OperatorRole::Operator));
        assert_eq!(OperatorRole::parse("vendedor"), Some(OperatorRole::Seller));
        assert_eq!(OperatorRole::parse("admin"), None);
    }

    #[test]
    fn limit_headers_round_sanely() {
        let mut headers = http::HeaderMap::new();
        set_limit_headers(&mut headers, 10.0, 3.7, 5.0);
        assert_eq!(headers["X-RateLimit-Limit"], "10");
        assert_eq!(headers["X-RateLimit-Remaining"], "3");
        assert_eq!(headers["X-RateLimit-Reset"], "2");
    }

    #[tokio::test]
    async fn bucket_drains_per_operator() {
        let buckets = TokenBuckets {
            rate_per_sec: 1.0,
            capacity: 2.0,
            buckets: Arc::new(Mutex::new(HashMap::new())),
        };
        assert!(buckets.consume("ana").await.is_ok());
        assert!(buckets.consume("ana").await.is_ok());
        let exceeded = buckets.consume("ana").await.expect_err("drained");
        assert!(exceeded.retry_after > 0.0);
        // other operators have their own bucket
        assert!(buckets.consume("luis").await.is_ok());
    }
}
