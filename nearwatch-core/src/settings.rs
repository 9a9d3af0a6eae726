use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;

use nearwatch_shared::errors::AppResult;

use crate::models::SystemSettings;
use crate::store::SettingsStore;

pub const DEFAULT_TTL: Duration = Duration::from_secs(60);

const CHANGE_CHANNEL_CAPACITY: usize = 16;

struct Cached {
    value: Arc<SystemSettings>,
    loaded_at: Instant,
}

/// Short-lived snapshot of `SystemSettings`.
///
/// Fresh reads only take the read lock. A stale read serializes on the reload
/// mutex and checks freshness again before touching the store, so a burst of
/// readers after expiry causes one load.
pub struct SettingsCache {
    store: Arc<dyn SettingsStore>,
    ttl: Duration,
    cached: RwLock<Option<Cached>>,
    reload: Mutex<()>,
    changes: broadcast::Sender<Arc<SystemSettings>>,
}

impl SettingsCache {
    pub fn new(store: Arc<dyn SettingsStore>) -> Self {
        Self::with_ttl(store, DEFAULT_TTL)
    }

    pub fn with_ttl(store: Arc<dyn SettingsStore>, ttl: Duration) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            store,
            ttl,
            cached: RwLock::new(None),
            reload: Mutex::new(()),
            changes,
        }
    }

    fn fresh(&self) -> Option<Arc<SystemSettings>> {
        self.cached
            .read()
            .as_ref()
            .filter(|c| c.loaded_at.elapsed() < self.ttl)
            .map(|c| Arc::clone(&c.value))
    }

    fn replace(&self, value: Arc<SystemSettings>) {
        *self.cached.write() = Some(Cached {
            value,
            loaded_at: Instant::now(),
        });
    }

    pub fn get(&self) -> AppResult<Arc<SystemSettings>> {
        if let Some(value) = self.fresh() {
            return Ok(value);
        }

        let _reload = self.reload.lock();
        if let Some(value) = self.fresh() {
            return Ok(value);
        }

        let value = Arc::new(self.store.load_settings()?);
        self.replace(Arc::clone(&value));
        tracing::debug!("system settings reloaded");
        Ok(value)
    }

    /// Drop the snapshot; the next `get` reloads.
    pub fn invalidate(&self) {
        *self.cached.write() = None;
    }

    /// Write through to the store, replace the snapshot, and notify listeners.
    pub fn update(&self, settings: SystemSettings) -> AppResult<Arc<SystemSettings>> {
        let _reload = self.reload.lock();
        let saved = Arc::new(self.store.save_settings(&settings)?);
        self.replace(Arc::clone(&saved));

        let listeners = self.changes.send(Arc::clone(&saved)).unwrap_or(0);
        tracing::info!(listeners, "system settings updated");
        Ok(saved)
    }

    /// Receive every settings value written through `update`.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<SystemSettings>> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingStore {
        inner: MemoryStore,
        loads: AtomicUsize,
        delay: Duration,
    }

    impl CountingStore {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                inner: MemoryStore::new(),
                loads: AtomicUsize::new(0),
                delay,
            })
        }

        fn loads(&self) -> usize {
            self.loads.load(Ordering::SeqCst)
        }
    }

    impl SettingsStore for CountingStore {
        fn load_settings(&self) -> AppResult<SystemSettings> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            self.inner.load_settings()
        }

        fn save_settings(&self, settings: &SystemSettings) -> AppResult<SystemSettings> {
            self.inner.save_settings(settings)
        }
    }

    #[test]
    fn fresh_snapshot_is_served_from_memory() {
        let store = CountingStore::new(Duration::ZERO);
        let cache = SettingsCache::new(store.clone());

        cache.get().unwrap();
        cache.get().unwrap();
        assert_eq!(store.loads(), 1);

        cache.invalidate();
        cache.get().unwrap();
        assert_eq!(store.loads(), 2);
    }

    #[test]
    fn expired_snapshot_reloads() {
        let store = CountingStore::new(Duration::ZERO);
        let cache = SettingsCache::with_ttl(store.clone(), Duration::ZERO);

        cache.get().unwrap();
        cache.get().unwrap();
        assert_eq!(store.loads(), 2);
    }

    #[test]
    fn concurrent_readers_trigger_one_load() {
        let store = CountingStore::new(Duration::from_millis(50));
        let cache = SettingsCache::new(store.clone());

        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| cache.get().unwrap());
            }
        });
        assert_eq!(store.loads(), 1);
    }

    #[test]
    fn update_writes_through_and_broadcasts() {
        let store = CountingStore::new(Duration::ZERO);
        let cache = SettingsCache::new(store.clone());
        let mut changes = cache.subscribe();

        let updated = cache
            .update(SystemSettings {
                retention_days: 7,
                ..SystemSettings::default()
            })
            .unwrap();
        assert_eq!(updated.retention_days, 7);
        assert_eq!(cache.get().unwrap().retention_days, 7);
        assert_eq!(store.loads(), 0);
        assert_eq!(store.inner.load_settings().unwrap().retention_days, 7);
        assert_eq!(changes.try_recv().unwrap().retention_days, 7);
    }
}
