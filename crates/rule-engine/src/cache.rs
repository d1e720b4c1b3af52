use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::context::{RequestContext, ResponseContext, RuleContext, UserContext};
use crate::result::RuleExecutionResult;
use crate::schema::RuleCategory;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct CacheKey {
    fingerprint: String,
    category: RuleCategory,
}

impl CacheKey {
    pub fn new(context: &RuleContext, category: RuleCategory) -> Self {
        Self {
            fingerprint: fingerprint(context),
            category,
        }
    }
}

/// The parts of a context that can change a rule's outcome. Timestamp and
/// request id are left out so identical requests share an entry.
#[derive(Serialize)]
struct Fingerprinted<'a> {
    user: &'a Option<UserContext>,
    request: &'a Option<RequestContext>,
    response: &'a Option<ResponseContext>,
    data: &'a Option<serde_json::Value>,
    client_ip: &'a str,
    user_agent: Option<&'a str>,
}

/// Hex SHA-256 over the canonical JSON of the relevant context subset.
pub fn fingerprint(context: &RuleContext) -> String {
    let subset = Fingerprinted {
        user: &context.user,
        request: &context.request,
        response: &context.response,
        data: &context.data,
        client_ip: &context.metadata.client_ip,
        user_agent: context.metadata.user_agent.as_deref(),
    };
    // Maps in the context are BTreeMaps, so the encoding is deterministic.
    let canonical = serde_json::to_vec(&subset).unwrap_or_default();
    hex::encode(Sha256::digest(&canonical))
}

struct CacheEntry {
    results: Vec<RuleExecutionResult>,
    stored_at: Instant,
}

/// Result lists keyed by `(fingerprint, category)`.
///
/// Expired entries are dropped when read, and swept from the whole map on
/// insert at most once per TTL.
pub(crate) struct ResultCache {
    ttl: Duration,
    inner: Mutex<Inner>,
}

struct Inner {
    entries: HashMap<CacheKey, CacheEntry>,
    last_sweep: Instant,
}

impl ResultCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                last_sweep: Instant::now(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fetch a live entry. Expired entries are removed on the way out.
    pub fn get(&self, key: &CacheKey) -> Option<Vec<RuleExecutionResult>> {
        let mut inner = self.lock();
        match inner.entries.get(key) {
            Some(entry) if entry.stored_at.elapsed() < self.ttl => Some(
                entry
                    .results
                    .iter()
                    .cloned()
                    .map(|mut r| {
                        r.cached = true;
                        r
                    })
                    .collect(),
            ),
            Some(_) => {
                inner.entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, key: CacheKey, results: Vec<RuleExecutionResult>) {
        let ttl = self.ttl;
        let mut inner = self.lock();
        if inner.last_sweep.elapsed() >= ttl {
            inner.entries.retain(|_, entry| entry.stored_at.elapsed() < ttl);
            inner.last_sweep = Instant::now();
        }
        inner.entries.insert(
            key,
            CacheEntry {
                results,
                stored_at: Instant::now(),
            },
        );
    }

    pub fn clear(&self) {
        self.lock().entries.clear();
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::RuleDefinition;
    use serde_json::json;

    fn results() -> Vec<RuleExecutionResult> {
        let rule = RuleDefinition::new("r1", "Rule", RuleCategory::Content);
        vec![RuleExecutionResult::passed(&rule, 0.2)]
    }

    #[test]
    fn fingerprint_ignores_timestamp_and_request_id() {
        let a = RuleContext::with_data(json!({"title": "x"}));
        let mut b = RuleContext::with_data(json!({"title": "x"}));
        b.metadata.timestamp = a.metadata.timestamp + chrono::Duration::seconds(30);
        b.metadata.request_id = Some("req-2".into());
        assert_eq!(fingerprint(&a), fingerprint(&b));

        let c = RuleContext::with_data(json!({"title": "y"}));
        assert_ne!(fingerprint(&a), fingerprint(&c));
        assert_eq!(fingerprint(&a).len(), 64);
    }

    #[test]
    fn hit_marks_results_cached() {
        let cache = ResultCache::new(Duration::from_secs(60));
        let key = CacheKey::new(&RuleContext::default(), RuleCategory::Content);
        assert!(cache.get(&key).is_none());

        cache.insert(key.clone(), results());
        let hit = cache.get(&key).unwrap();
        assert_eq!(hit.len(), 1);
        assert!(hit[0].cached);
    }

    #[test]
    fn category_is_part_of_the_key() {
        let cache = ResultCache::new(Duration::from_secs(60));
        let ctx = RuleContext::default();
        cache.insert(CacheKey::new(&ctx, RuleCategory::Content), results());
        assert!(cache.get(&CacheKey::new(&ctx, RuleCategory::Security)).is_none());
    }

    #[test]
    fn expired_entries_are_dropped_on_read() {
        let cache = ResultCache::new(Duration::ZERO);
        let key = CacheKey::new(&RuleContext::default(), RuleCategory::User);
        cache.insert(key.clone(), results());
        assert_eq!(cache.len(), 1);
        assert!(cache.get(&key).is_none());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn stale_entries_are_swept_on_insert() {
        let cache = ResultCache::new(Duration::from_millis(20));
        for n in 0..3 {
            let ctx = RuleContext::with_data(json!({ "n": n }));
            cache.insert(CacheKey::new(&ctx, RuleCategory::Content), results());
        }
        assert_eq!(cache.len(), 3);

        std::thread::sleep(Duration::from_millis(30));
        cache.insert(CacheKey::new(&RuleContext::default(), RuleCategory::Content), results());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn clear_drops_everything() {
        let cache = ResultCache::new(Duration::from_secs(60));
        cache.insert(CacheKey::new(&RuleContext::default(), RuleCategory::User), results());
        cache.clear();
        assert_eq!(cache.len(), 0);
    }
}
