//! LRU cache of optimized physical plans.
//!
//! Keyed by a fingerprint of the action tree's structure with literal
//! values replaced by type placeholders, the optimization level and the
//! data shape signature. Entries are immutable `Arc`s, so a hit never holds
//! the lock while the plan is used.

use crate::plan::PhysicalPlan;
use lru::LruCache;
use parking_lot::Mutex;
use quarry_core::value::{canonical_string, type_name};
use quarry_core::{Action, OptimizationLevel};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Instant;
use tracing::trace;

pub const DEFAULT_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub struct CachedPlan {
    pub plan: Arc<PhysicalPlan>,
    pub last_used: Instant,
    pub hits: u64,
}

/// Statistics about cache performance
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    /// Current number of cached plans
    pub size: usize,
}

impl CacheStats {
    /// Hit ratio in [0, 1]
    pub fn hit_ratio(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }
}

/// Thread-safe bounded plan cache.
pub struct PlanCache {
    plans: Mutex<LruCache<String, CachedPlan>>,
    stats: Mutex<CacheStats>,
    capacity: usize,
}

impl std::fmt::Debug for PlanCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlanCache")
            .field("capacity", &self.capacity)
            .field("stats", &self.stats())
            .finish()
    }
}

impl Default for PlanCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl PlanCache {
    pub fn new(capacity: usize) -> Self {
        let bounded = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            plans: Mutex::new(LruCache::new(bounded)),
            stats: Mutex::new(CacheStats::default()),
            capacity: bounded.get(),
        }
    }

    pub fn get(&self, fingerprint: &str) -> Option<Arc<PhysicalPlan>> {
        let found = {
            let mut plans = self.plans.lock();
            plans.get_mut(fingerprint).map(|entry| {
                entry.hits += 1;
                entry.last_used = Instant::now();
                Arc::clone(&entry.plan)
            })
        };
        let mut stats = self.stats.lock();
        if found.is_some() {
            stats.hits += 1;
            trace!(fingerprint, "plan cache hit");
        } else {
            stats.misses += 1;
            trace!(fingerprint, "plan cache miss");
        }
        found
    }

    pub fn insert(&self, plan: Arc<PhysicalPlan>) {
        let key = plan.fingerprint.clone();
        let entry = CachedPlan {
            plan,
            last_used: Instant::now(),
            hits: 0,
        };
        let evicted = {
            let mut plans = self.plans.lock();
            matches!(plans.push(key.clone(), entry), Some((old, _)) if old != key)
        };
        if evicted {
            self.stats.lock().evictions += 1;
        }
    }

    pub fn invalidate(&self, fingerprint: &str) -> bool {
        self.plans.lock().pop(fingerprint).is_some()
    }

    pub fn clear(&self) {
        self.plans.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.plans.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> CacheStats {
        let mut stats = *self.stats.lock();
        stats.size = self.len();
        stats
    }
}

/// Replace literal payloads with their type name, drop action ids and spans
fn normalize(value: &mut Value) {
    match value {
        Value::Object(map) => {
            if map.contains_key("kind") && map.contains_key("params") {
                map.remove("id");
                map.remove("span");
            }
            for (key, child) in map.iter_mut() {
                if key == "literal" {
                    *child = Value::String(format!("?{}", type_name(child)));
                } else {
                    normalize(child);
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(normalize),
        _ => {}
    }
}

/// Cache key for an action tree under a level and data shape
pub fn fingerprint(action: &Action, level: OptimizationLevel, signature: &str) -> String {
    let mut tree = serde_json::to_value(action).unwrap_or(Value::Null);
    normalize(&mut tree);
    let canonical = format!("{}|{}|{}", canonical_string(&tree), level.as_str(), signature);
    hex::encode(blake3::hash(canonical.as_bytes()).as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{PlanHints, PlanNode, PlanOp};
    use quarry_syntax::{ParserBridge, QueryFormat};

    fn plan(fingerprint: &str) -> Arc<PhysicalPlan> {
        Arc::new(PhysicalPlan {
            root: PlanNode::new(PlanOp::Input),
            fingerprint: fingerprint.into(),
            level: OptimizationLevel::Standard,
            hints: PlanHints::default(),
            passes: 0,
            applied_rules: Vec::new(),
        })
    }

    fn sql(text: &str) -> Action {
        ParserBridge::new().parse(text, QueryFormat::Sql).unwrap().action
    }

    #[test]
    fn test_hit_and_miss_counting() {
        let cache = PlanCache::new(4);
        assert!(cache.get("a").is_none());
        cache.insert(plan("a"));
        assert!(cache.get("a").is_some());
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.size), (1, 1, 1));
        assert!((stats.hit_ratio() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_lru_eviction() {
        let cache = PlanCache::new(2);
        cache.insert(plan("a"));
        cache.insert(plan("b"));
        cache.get("a");
        cache.insert(plan("c"));
        assert!(cache.get("b").is_none());
        assert!(cache.get("a").is_some());
        assert_eq!(cache.stats().evictions, 1);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_reinsert_is_not_an_eviction() {
        let cache = PlanCache::new(2);
        cache.insert(plan("a"));
        cache.insert(plan("a"));
        assert_eq!(cache.stats().evictions, 0);
    }

    #[test]
    fn test_invalidate_and_clear() {
        let cache = PlanCache::new(4);
        cache.insert(plan("a"));
        cache.insert(plan("b"));
        assert!(cache.invalidate("a"));
        assert!(!cache.invalidate("a"));
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_fingerprint_ignores_literal_values() {
        let a = fingerprint(&sql("SELECT name FROM users WHERE age > 25"), OptimizationLevel::Standard, "sig");
        let b = fingerprint(&sql("SELECT name FROM users WHERE age > 40"), OptimizationLevel::Standard, "sig");
        let c = fingerprint(&sql("SELECT name FROM users WHERE age > 'x'"), OptimizationLevel::Standard, "sig");
        let d = fingerprint(&sql("SELECT city FROM users WHERE age > 25"), OptimizationLevel::Standard, "sig");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_fingerprint_includes_level_and_signature() {
        let action = sql("SELECT name FROM users");
        let base = fingerprint(&action, OptimizationLevel::Standard, "sig");
        assert_ne!(base, fingerprint(&action, OptimizationLevel::Basic, "sig"));
        assert_ne!(base, fingerprint(&action, OptimizationLevel::Standard, "other"));
    }
}
