use crate::models::UploadResponse;
use redis::AsyncCommands;

pub fn cache_key(key: &str) -> String {
    format!("rastro:idem:{key}")
}

pub fn ttl_from_env() -> usize {
    std::env::var("IDEMPOTENCY_TTL_SECS")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(3600)
}

pub async fn redis_get(client: &redis::Client, key: &str) -> Option<UploadResponse> {
    let mut conn = match client.get_multiplexed_async_connection().await {
        Ok(c) => c,
        Err(_) => return None,
    };
    let s: Option<String> = conn.get(cache_key(key)).await.ok();
    s.and_then(|v| serde_json::from_str(&v).ok())
}

pub async fn redis_set(
    client: &redis::Client,
    key: &str,
    value: &UploadResponse,
    ttl_secs: usize,
) {
    if let Ok(mut conn) = client.get_multiplexed_async_connection().await
        && let Ok(json) = serde_json::to_string(value)
    {
        let _: Result<(), _> = conn.set_ex(cache_key(key), json, ttl_secs as u64).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_keys_are_namespaced() {
        assert_eq!(cache_key("abc-123"), "rastro:idem:abc-123");
    }
}
