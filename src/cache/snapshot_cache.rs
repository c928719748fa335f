//! Holds the current pattern/rule/hierarchy snapshot.
//!
//! Loaded lazily from the store; refresh swaps in a new `Arc` so calls
//! already running keep the snapshot they started with.

use std::sync::{Arc, RwLock};

use crate::error::Result;
use crate::store::{HierarchyStore, PatternStore, RuleStore, Snapshot};

#[derive(Default)]
struct Slot {
    /// None = not loaded
    snapshot: Option<Arc<Snapshot>>,
    /// Bumped by every `clear`; a load started under an older generation
    /// is never installed.
    generation: u64,
}

pub struct SnapshotCache {
    inner: RwLock<Slot>,
    hierarchy_max_depth: usize,
}

impl SnapshotCache {
    /// Create an empty cache (not loaded).
    pub fn new(hierarchy_max_depth: usize) -> Self {
        Self {
            inner: RwLock::new(Slot::default()),
            hierarchy_max_depth,
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).snapshot.is_some()
    }

    /// Current snapshot, if loaded.
    pub fn current(&self) -> Option<Arc<Snapshot>> {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).snapshot.clone()
    }

    fn generation(&self) -> u64 {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).generation
    }

    /// Read a fresh snapshot from `store` and make it current.
    ///
    /// If the cache was cleared while the store was being read, the snapshot
    /// is returned to the caller but not installed.
    pub async fn refresh<S>(&self, store: &S) -> Result<Arc<Snapshot>>
    where
        S: PatternStore + RuleStore + HierarchyStore + ?Sized,
    {
        let started = self.generation();
        let snapshot = Arc::new(Snapshot::load(store, self.hierarchy_max_depth).await?);

        let mut slot = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if slot.generation == started {
            slot.snapshot = Some(Arc::clone(&snapshot));
        } else {
            log::debug!("Snapshot cache cleared during load, not installing stale snapshot");
        }
        Ok(snapshot)
    }

    /// Current snapshot, loading it first if needed.
    pub async fn load_if_needed<S>(&self, store: &S) -> Result<Arc<Snapshot>>
    where
        S: PatternStore + RuleStore + HierarchyStore + ?Sized,
    {
        match self.current() {
            Some(snapshot) => Ok(snapshot),
            None => self.refresh(store).await,
        }
    }

    /// Drop the snapshot (e.g. after a pattern write). Next call reloads.
    pub fn clear(&self) {
        let mut slot = self.inner.write().unwrap_or_else(|e| e.into_inner());
        slot.snapshot = None;
        slot.generation += 1;
    }
}

impl Default for SnapshotCache {
    fn default() -> Self {
        Self::new(10)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::{RelationType, TypeHierarchyEdge, ValidTypeRelation};
    use crate::pattern::Pattern;
    use crate::rules::SemanticRule;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Store that, on its first pattern read, lets a pattern write and a
    /// cache clear land after the read has already happened.
    struct WriteDuringLoad {
        inner: MemoryStore,
        cache: Arc<SnapshotCache>,
        armed: AtomicBool,
    }

    #[async_trait]
    impl PatternStore for WriteDuringLoad {
        async fn get_patterns(&self, semantic_type: Option<&str>) -> Result<Vec<Pattern>> {
            let patterns = self.inner.get_patterns(semantic_type).await?;
            if self.armed.swap(false, Ordering::SeqCst) {
                self.inner.put_pattern(&Pattern::new("late", "Doc", 0.5)).await?;
                self.cache.clear();
            }
            Ok(patterns)
        }
        async fn put_pattern(&self, pattern: &Pattern) -> Result<()> {
            self.inner.put_pattern(pattern).await
        }
    }

    #[async_trait]
    impl RuleStore for WriteDuringLoad {
        async fn get_rules(&self, target_type: Option<&str>) -> Result<Vec<SemanticRule>> {
            self.inner.get_rules(target_type).await
        }
        async fn put_rule(&self, rule: &SemanticRule) -> Result<()> {
            self.inner.put_rule(rule).await
        }
    }

    #[async_trait]
    impl HierarchyStore for WriteDuringLoad {
        async fn get_edges(&self) -> Result<Vec<TypeHierarchyEdge>> {
            self.inner.get_edges().await
        }
        async fn get_valid_relations(&self) -> Result<Vec<ValidTypeRelation>> {
            self.inner.get_valid_relations().await
        }
        async fn get_relation_types(&self) -> Result<Vec<RelationType>> {
            self.inner.get_relation_types().await
        }
        async fn put_edge(&self, edge: &TypeHierarchyEdge) -> Result<()> {
            self.inner.put_edge(edge).await
        }
        async fn put_valid_relation(&self, relation: &ValidTypeRelation) -> Result<()> {
            self.inner.put_valid_relation(relation).await
        }
        async fn put_relation_type(&self, relation_type: &RelationType) -> Result<()> {
            self.inner.put_relation_type(relation_type).await
        }
    }

    #[test]
    fn test_cache_new_not_loaded() {
        let cache = SnapshotCache::default();
        assert!(!cache.is_loaded());
        assert!(cache.current().is_none());
    }

    #[tokio::test]
    async fn test_load_if_needed_reuses_snapshot() {
        let store = MemoryStore::new();
        let cache = SnapshotCache::default();

        let first = cache.load_if_needed(&store).await.unwrap();
        store.put_pattern(&Pattern::new("p", "Doc", 0.5)).await.unwrap();
        let second = cache.load_if_needed(&store).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert!(second.patterns().is_empty());
    }

    #[tokio::test]
    async fn test_refresh_does_not_touch_held_snapshot() {
        let store = MemoryStore::new();
        let cache = SnapshotCache::default();
        let held = cache.load_if_needed(&store).await.unwrap();

        store.put_pattern(&Pattern::new("p", "Doc", 0.5)).await.unwrap();
        let fresh = cache.refresh(&store).await.unwrap();

        assert!(held.patterns().is_empty());
        assert_eq!(fresh.patterns().len(), 1);
        assert!(Arc::ptr_eq(&cache.current().unwrap(), &fresh));

        cache.clear();
        assert!(!cache.is_loaded());
        assert_eq!(held.patterns().len(), 0);
    }

    #[tokio::test]
    async fn test_clear_during_load_discards_stale_snapshot() {
        let cache = Arc::new(SnapshotCache::default());
        let store = WriteDuringLoad {
            inner: MemoryStore::new(),
            cache: Arc::clone(&cache),
            armed: AtomicBool::new(true),
        };

        let stale = cache.refresh(&store).await.unwrap();
        assert!(stale.patterns().is_empty());
        assert!(!cache.is_loaded());

        let fresh = cache.load_if_needed(&store).await.unwrap();
        assert_eq!(fresh.patterns().len(), 1);
        assert!(cache.is_loaded());
    }
}
