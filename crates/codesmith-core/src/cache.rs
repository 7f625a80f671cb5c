//! Process-wide response cache.
//!
//! Keyed by SHA-256 over (repo, question, context hints). Bounded by entry
//! count and TTL; the oldest entry is evicted when full. Concurrent
//! writers of one key race and the last write wins.

use std::collections::HashMap;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::config::CacheConfig;
use crate::domain::response::{OrchestrationResponse, QueryRequest};

/// Hex SHA-256 cache key for a request.
///
/// Fields are length-prefixed so `("ab", "c")` and `("a", "bc")` differ.
/// Hint order does not matter.
pub fn cache_key(request: &QueryRequest) -> String {
    let mut hints = request.context_file_hints.clone();
    hints.sort();
    hints.dedup();

    let mut hasher = Sha256::new();
    for part in [request.repo_id.as_str(), request.question.trim()]
        .into_iter()
        .chain(hints.iter().map(String::as_str))
    {
        hasher.update((part.len() as u64).to_le_bytes());
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone)]
struct Entry {
    response: OrchestrationResponse,
    inserted_at: Instant,
}

#[derive(Debug)]
pub struct ResponseCache {
    entries: RwLock<HashMap<String, Entry>>,
    capacity: usize,
    ttl: Duration,
}

impl ResponseCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            capacity: config.capacity.max(1),
            ttl: Duration::from_secs(config.ttl_secs),
        }
    }

    /// Live entry for `key`, if any.
    pub async fn get(&self, key: &str) -> Option<OrchestrationResponse> {
        let entries = self.entries.read().await;
        entries
            .get(key)
            .filter(|e| e.inserted_at.elapsed() < self.ttl)
            .map(|e| e.response.clone())
    }

    pub async fn insert(&self, key: String, response: OrchestrationResponse) {
        let mut entries = self.entries.write().await;
        let ttl = self.ttl;
        entries.retain(|_, e| e.inserted_at.elapsed() < ttl);

        if !entries.contains_key(&key) && entries.len() >= self.capacity {
            let oldest = entries
                .iter()
                .min_by_key(|(_, e)| e.inserted_at)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                entries.remove(&oldest);
            }
        }
        entries.insert(
            key,
            Entry {
                response,
                inserted_at: Instant::now(),
            },
        );
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::routing::{AgentAction, RoutingDecision, RoutingTier};

    fn response(answer: &str) -> OrchestrationResponse {
        OrchestrationResponse {
            request_id: uuid::Uuid::new_v4(),
            routing: RoutingDecision::new(
                AgentAction::Explain,
                [],
                [],
                0.9,
                "test",
                RoutingTier::Heuristic,
            ),
            agents_used: vec![],
            agents_skipped: vec![],
            answer: answer.to_string(),
            generate: None,
            test: None,
            evaluation: None,
            impact: None,
            decomposition: None,
            citations: None,
            degraded: vec![],
            cached: false,
            generated_at: chrono::Utc::now(),
        }
    }

    fn cache(capacity: usize, ttl_secs: u64) -> ResponseCache {
        ResponseCache::new(&CacheConfig {
            enabled: true,
            capacity,
            ttl_secs,
        })
    }

    #[test]
    fn test_key_is_stable_and_field_separated() {
        let mut a = QueryRequest::new("ab", "c");
        let b = QueryRequest::new("a", "bc");
        assert_ne!(cache_key(&a), cache_key(&b));
        assert_eq!(cache_key(&a).len(), 64);

        a.context_file_hints = vec!["y.py".into(), "x.py".into()];
        let mut c = QueryRequest::new("ab", "c");
        c.context_file_hints = vec!["x.py".into(), "y.py".into()];
        assert_eq!(cache_key(&a), cache_key(&c));
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire_after_ttl() {
        let cache = cache(4, 60);
        cache.insert("k".into(), response("one")).await;
        assert_eq!(cache.get("k").await.unwrap().answer, "one");

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(cache.get("k").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_evicts_oldest() {
        let cache = cache(2, 600);
        cache.insert("a".into(), response("a")).await;
        tokio::time::advance(Duration::from_millis(10)).await;
        cache.insert("b".into(), response("b")).await;
        tokio::time::advance(Duration::from_millis(10)).await;
        cache.insert("c".into(), response("c")).await;

        assert_eq!(cache.len().await, 2);
        assert!(cache.get("a").await.is_none());
        assert!(cache.get("c").await.is_some());
    }

    #[tokio::test]
    async fn test_last_writer_wins() {
        let cache = cache(2, 600);
        cache.insert("k".into(), response("first")).await;
        cache.insert("k".into(), response("second")).await;
        assert_eq!(cache.len().await, 1);
        assert_eq!(cache.get("k").await.unwrap().answer, "second");
    }
}
