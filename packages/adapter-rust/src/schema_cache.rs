//! Schema Cache: per-class schemas with TTL, explicit invalidation and
//! per-key load coalescing.
//!
//! Each class has a slot holding one shared load future. Concurrent readers
//! of a cold slot await the same future and observe the same outcome, error
//! included, so a miss issues exactly one [`SchemaSource::load_class`] call.
//! Failed and expired slots are swapped for fresh ones; invalidation removes
//! them. Instances are independent:
//! there is no process-wide cache.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use tessera_core::{ClassSchema, EngineError, EngineResult};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Where schemas are loaded from on a miss.
///
/// Used as `Arc<dyn SchemaSource>`.
#[async_trait]
pub trait SchemaSource: Send + Sync {
    /// Returns `None` when the class does not exist.
    async fn load_class(&self, class_name: &str) -> EngineResult<Option<ClassSchema>>;
}

/// A schema change notice, local or from another process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaChange {
    Class(String),
    All,
}

type Loaded = (Arc<ClassSchema>, Instant);

struct Slot {
    load: Shared<BoxFuture<'static, EngineResult<Loaded>>>,
}

impl Slot {
    fn new(source: Arc<dyn SchemaSource>, class_name: String) -> Self {
        let load = async move {
            let schema = load_from(source.as_ref(), &class_name).await?;
            Ok::<_, EngineError>((schema, Instant::now()))
        };
        Self {
            load: load.boxed().shared(),
        }
    }
}

const CHANGE_CHANNEL_CAPACITY: usize = 64;

pub struct SchemaCache {
    source: Arc<dyn SchemaSource>,
    ttl: Duration,
    slots: DashMap<String, Arc<Slot>>,
    changes: broadcast::Sender<SchemaChange>,
}

impl SchemaCache {
    /// A zero `ttl` disables caching: every read goes to the source.
    #[must_use]
    pub fn new(source: Arc<dyn SchemaSource>, ttl: Duration) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            source,
            ttl,
            slots: DashMap::new(),
            changes,
        }
    }

    /// Returns the schema of `class_name`.
    ///
    /// # Errors
    ///
    /// Returns `ClassNotFound` when the source has no such class, or the
    /// source's own error. Every reader waiting on the failed load gets the
    /// same error; the next read loads again.
    pub async fn get(&self, class_name: &str) -> EngineResult<Arc<ClassSchema>> {
        if self.ttl.is_zero() {
            return load_from(self.source.as_ref(), class_name).await;
        }
        loop {
            let slot = self.slot(class_name);
            match slot.load.clone().await {
                Ok((schema, loaded_at)) if loaded_at.elapsed() < self.ttl => return Ok(schema),
                // Expired: swap the slot out unless someone already did.
                Ok(_) => self.evict(class_name, &slot),
                Err(err) => {
                    self.evict(class_name, &slot);
                    return Err(err);
                }
            }
        }
    }

    /// Returns the cached schema without loading.
    #[must_use]
    pub fn peek(&self, class_name: &str) -> Option<Arc<ClassSchema>> {
        let slot = self.slots.get(class_name)?;
        match slot.load.peek()? {
            Ok((schema, loaded_at)) if loaded_at.elapsed() < self.ttl => Some(Arc::clone(schema)),
            _ => None,
        }
    }

    pub fn invalidate(&self, class_name: &str) {
        self.slots.remove(class_name);
        tracing::debug!(class = class_name, "schema cache entry invalidated");
    }

    pub fn invalidate_all(&self) {
        self.slots.clear();
        tracing::debug!("schema cache cleared");
    }

    /// Applies a change locally and broadcasts it to subscribers.
    pub fn publish(&self, change: SchemaChange) {
        self.apply(&change);
        // No subscribers is fine.
        let _ = self.changes.send(change);
    }

    /// Subscribes to changes published by this cache.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SchemaChange> {
        self.changes.subscribe()
    }

    /// Invalidates on every notice received from `rx` until the channel
    /// closes. A lagging receiver clears the whole cache.
    pub fn spawn_listener(self: &Arc<Self>, mut rx: broadcast::Receiver<SchemaChange>) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(change) => cache.apply(&change),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "schema change notices lagged; clearing cache");
                        cache.invalidate_all();
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    fn apply(&self, change: &SchemaChange) {
        match change {
            SchemaChange::Class(name) => self.invalidate(name),
            SchemaChange::All => self.invalidate_all(),
        }
    }

    fn slot(&self, class_name: &str) -> Arc<Slot> {
        if let Some(slot) = self.slots.get(class_name) {
            return Arc::clone(slot.value());
        }
        let entry = self
            .slots
            .entry(class_name.to_string())
            .or_insert_with(|| Arc::new(Slot::new(Arc::clone(&self.source), class_name.to_string())));
        Arc::clone(entry.value())
    }

    fn evict(&self, class_name: &str, slot: &Arc<Slot>) {
        self.slots
            .remove_if(class_name, |_, current| Arc::ptr_eq(current, slot));
    }
}

async fn load_from(source: &dyn SchemaSource, class_name: &str) -> EngineResult<Arc<ClassSchema>> {
    tracing::debug!(class = class_name, "loading schema");
    source
        .load_class(class_name)
        .await?
        .map(Arc::new)
        .ok_or_else(|| EngineError::ClassNotFound(class_name.to_string()))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tessera_core::FieldType;

    use super::*;

    struct CountingSource {
        loads: AtomicUsize,
        delay: Duration,
    }

    impl CountingSource {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                loads: AtomicUsize::new(0),
                delay,
            })
        }

        fn loads(&self) -> usize {
            self.loads.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SchemaSource for CountingSource {
        async fn load_class(&self, class_name: &str) -> EngineResult<Option<ClassSchema>> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            match class_name {
                "Missing" => return Ok(None),
                "Broken" => {
                    return Err(EngineError::Store {
                        code: 6,
                        message: "host unreachable".to_string(),
                    })
                }
                _ => {}
            }
            ClassSchema::with_fields(class_name, [("title", FieldType::String)]).map(Some)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_misses_coalesce() {
        let source = CountingSource::new(Duration::from_millis(50));
        let cache = Arc::new(SchemaCache::new(source.clone(), Duration::from_secs(5)));
        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..16 {
            let cache = Arc::clone(&cache);
            tasks.spawn(async move { cache.get("Post").await });
        }
        while let Some(result) = tasks.join_next().await {
            assert_eq!(result.unwrap().unwrap().class_name, "Post");
        }
        assert_eq!(source.loads(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_failing_misses_share_one_load() {
        let source = CountingSource::new(Duration::from_millis(50));
        let cache = Arc::new(SchemaCache::new(source.clone(), Duration::from_secs(5)));
        for (class_name, expected) in [
            ("Missing", EngineError::ClassNotFound("Missing".to_string())),
            (
                "Broken",
                EngineError::Store {
                    code: 6,
                    message: "host unreachable".to_string(),
                },
            ),
        ] {
            let before = source.loads();
            let mut tasks = tokio::task::JoinSet::new();
            for _ in 0..16 {
                let cache = Arc::clone(&cache);
                tasks.spawn(async move { cache.get(class_name).await });
            }
            while let Some(result) = tasks.join_next().await {
                assert_eq!(result.unwrap().unwrap_err(), expected);
            }
            assert_eq!(source.loads() - before, 1, "{class_name}");
            assert!(cache.peek(class_name).is_none());

            // The failure is not cached.
            assert!(cache.get(class_name).await.is_err());
            assert_eq!(source.loads() - before, 2, "{class_name}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn ttl_expiry_reloads() {
        let source = CountingSource::new(Duration::ZERO);
        let cache = SchemaCache::new(source.clone(), Duration::from_millis(100));
        cache.get("Post").await.unwrap();
        cache.get("Post").await.unwrap();
        assert_eq!(source.loads(), 1);
        tokio::time::advance(Duration::from_millis(150)).await;
        assert!(cache.peek("Post").is_none());
        cache.get("Post").await.unwrap();
        assert_eq!(source.loads(), 2);
    }

    #[tokio::test]
    async fn invalidate_forces_reload() {
        let source = CountingSource::new(Duration::ZERO);
        let cache = SchemaCache::new(source.clone(), Duration::from_secs(60));
        cache.get("Post").await.unwrap();
        cache.invalidate("Post");
        cache.get("Post").await.unwrap();
        cache.publish(SchemaChange::All);
        cache.get("Post").await.unwrap();
        assert_eq!(source.loads(), 3);
    }

    #[tokio::test]
    async fn zero_ttl_never_caches() {
        let source = CountingSource::new(Duration::ZERO);
        let cache = SchemaCache::new(source.clone(), Duration::ZERO);
        cache.get("Post").await.unwrap();
        cache.get("Post").await.unwrap();
        assert_eq!(source.loads(), 2);
    }

    #[tokio::test]
    async fn missing_class_is_not_cached() {
        let source = CountingSource::new(Duration::ZERO);
        let cache = SchemaCache::new(source.clone(), Duration::from_secs(60));
        for _ in 0..2 {
            assert_eq!(
                cache.get("Missing").await.unwrap_err(),
                EngineError::ClassNotFound("Missing".to_string())
            );
        }
        assert_eq!(source.loads(), 2);
    }

    #[tokio::test]
    async fn external_notice_invalidates_other_instance() {
        let source = CountingSource::new(Duration::ZERO);
        let writer = SchemaCache::new(source.clone(), Duration::from_secs(60));
        let reader = Arc::new(SchemaCache::new(source.clone(), Duration::from_secs(60)));
        let handle = reader.spawn_listener(writer.subscribe());

        reader.get("Post").await.unwrap();
        assert!(reader.peek("Post").is_some());
        writer.publish(SchemaChange::Class("Post".to_string()));
        for _ in 0..50 {
            if reader.peek("Post").is_none() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(reader.peek("Post").is_none());
        drop(writer);
        handle.await.unwrap();
    }
}
