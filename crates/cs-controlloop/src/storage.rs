//! Authoritative in-memory resource storage
//!
//! Storage holds the current snapshot of every resource and arbitrates
//! concurrent writers with generation numbers. Readers always receive deep
//! copies, so no reference into the map ever crosses into reconcile code.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use dashmap::DashMap;

use cs_core::{ObjectKey, StorageError};

use crate::queue::WorkQueue;
use crate::resource::ResourceObject;

/// In-memory keyed store of resource snapshots, paired with a work queue
pub struct Storage<T: ResourceObject> {
    objects: DashMap<ObjectKey, T>,
    queue: WorkQueue,
}

impl<T: ResourceObject> Storage<T> {
    /// Create a storage that schedules onto `queue`
    pub fn new(queue: WorkQueue) -> Self {
        Self {
            objects: DashMap::new(),
            queue,
        }
    }

    /// The queue this storage schedules onto
    pub fn queue(&self) -> &WorkQueue {
        &self.queue
    }

    /// Register a resource and schedule it for reconciliation
    ///
    /// Registering a key that already exists replaces its snapshot.
    pub fn add(&self, item: T) {
        let key = item.name().clone();
        self.objects.insert(key.clone(), item);
        self.queue.add(&key);
    }

    /// Deep copy of the current snapshot
    pub fn get(&self, key: &ObjectKey) -> Result<T, StorageError> {
        self.objects
            .get(key)
            .map(|r| r.deep_copy())
            .ok_or_else(|| StorageError::KeyNotExist(key.clone()))
    }

    /// Deep copies of every stored resource
    pub fn list(&self) -> Vec<T> {
        self.objects.iter().map(|r| r.deep_copy()).collect()
    }

    /// Commit `item` and schedule its key again
    ///
    /// Fails with `AlreadyUpdated` if a newer generation was committed since
    /// `item` was read, and with `KeyNotExist` if the resource is gone. The
    /// caller still owns its queue delivery and must mark it done.
    pub fn update(&self, item: T) -> Result<u64, StorageError> {
        let key = item.name().clone();
        let generation = self.commit(item)?;
        self.queue.add(&key);
        Ok(generation)
    }

    /// Commit `item` without touching the queue
    ///
    /// Same generation check as [`Storage::update`]. On success the stored
    /// generation is one more than before and is returned.
    pub fn commit(&self, mut item: T) -> Result<u64, StorageError> {
        let key = item.name().clone();
        let mut current = self
            .objects
            .get_mut(&key)
            .ok_or_else(|| StorageError::KeyNotExist(key.clone()))?;

        let stored = current.generation();
        let incoming = item.generation();
        if stored > incoming {
            return Err(StorageError::AlreadyUpdated {
                key,
                stored,
                incoming,
            });
        }

        let next = stored + 1;
        item.resource_mut().set_generation(next);
        *current = item;
        Ok(next)
    }

    /// Remove a resource and stop tracking it
    pub fn delete(&self, key: &ObjectKey) -> Option<T> {
        self.queue.finalize(key);
        self.objects.remove(key).map(|(_, item)| item)
    }

    /// Wait for the next ready key and resolve it to a snapshot
    ///
    /// Returns `None` once the queue has shut down. A key whose resource was
    /// deleted after it was queued resolves to `KeyNotExist`; the key is
    /// still held by the caller and must be marked done.
    pub async fn next_ready(&self) -> Option<Result<T, StorageError>> {
        let key = self.queue.get().await?;
        Some(self.get(&key))
    }

    pub fn contains(&self, key: &ObjectKey) -> bool {
        self.objects.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

/// Registry of storages keyed by resource type
///
/// Lets several control loops and observers share one storage per resource
/// type without a global.
#[derive(Default)]
pub struct Storages {
    store: RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl Storages {
    pub fn new() -> Self {
        Self::default()
    }

    /// Storage registered for `T`, if any
    pub fn get<T: ResourceObject>(&self) -> Option<Arc<Storage<T>>> {
        let store = self.store.read().unwrap_or_else(PoisonError::into_inner);
        let raw = Arc::clone(store.get(&TypeId::of::<T>())?);
        raw.downcast::<Storage<T>>().ok()
    }

    /// Register the storage for `T`, replacing any previous one
    pub fn set<T: ResourceObject>(&self, storage: Arc<Storage<T>>) {
        self.store
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(TypeId::of::<T>(), storage);
    }

    /// Number of registered storages
    pub fn len(&self) -> usize {
        self.store
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::Resource;

    fn storage() -> Storage<Resource> {
        Storage::new(WorkQueue::new())
    }

    #[tokio::test]
    async fn test_add_registers_and_enqueues() {
        let storage = storage();
        storage.add(Resource::new("r1"));

        assert!(storage.contains(&ObjectKey::new("r1")));
        assert!(storage.queue().is_tracked(&ObjectKey::new("r1")));
        assert_eq!(storage.queue().len(), 1);
    }

    #[test]
    fn test_get_returns_independent_copy() {
        let storage = storage();
        storage.add(Resource::new("r1"));

        let mut copy = storage.get(&ObjectKey::new("r1")).unwrap();
        copy.mark_true("Ready");

        let again = storage.get(&ObjectKey::new("r1")).unwrap();
        assert!(again.conditions().is_empty());
    }

    #[test]
    fn test_get_missing() {
        let storage = storage();
        let err = storage.get(&ObjectKey::new("nope")).unwrap_err();
        assert_eq!(err, StorageError::KeyNotExist(ObjectKey::new("nope")));
    }

    #[test]
    fn test_generation_strictly_increases() {
        let storage = storage();
        storage.add(Resource::new("r1"));
        let key = ObjectKey::new("r1");

        let mut last = 0;
        for _ in 0..5 {
            let copy = storage.get(&key).unwrap();
            let generation = storage.update(copy).unwrap();
            assert!(generation > last);
            last = generation;
        }
        assert_eq!(storage.get(&key).unwrap().generation(), 5);
    }

    #[test]
    fn test_stale_write_rejected_and_state_unchanged() {
        let storage = storage();
        storage.add(Resource::new("r1"));
        let key = ObjectKey::new("r1");

        let stale = storage.get(&key).unwrap();
        let mut fresh = storage.get(&key).unwrap();
        fresh.mark_true("Winner");
        storage.commit(fresh).unwrap();

        let mut loser = stale;
        loser.mark_true("Loser");
        let err = storage.commit(loser).unwrap_err();
        assert_eq!(
            err,
            StorageError::AlreadyUpdated {
                key: key.clone(),
                stored: 1,
                incoming: 0,
            }
        );

        let current = storage.get(&key).unwrap();
        assert_eq!(current.generation(), 1);
        assert!(current.condition("Winner").is_some());
        assert!(current.condition("Loser").is_none());
    }

    #[test]
    fn test_update_missing_key() {
        let storage = storage();
        let err = storage.update(Resource::new("ghost")).unwrap_err();
        assert!(err.is_key_not_exist());
    }

    #[tokio::test]
    async fn test_commit_does_not_schedule() {
        let storage = storage();
        storage.add(Resource::new("r1"));
        let key = storage.queue().get().await.unwrap();

        storage.commit(storage.get(&key).unwrap()).unwrap();
        storage.queue().done(&key);
        assert!(storage.queue().is_empty());

        storage.update(storage.get(&key).unwrap()).unwrap();
        assert_eq!(storage.queue().len(), 1);
    }

    #[test]
    fn test_delete_finalizes() {
        let storage = storage();
        storage.add(Resource::new("r1"));
        let key = ObjectKey::new("r1");

        assert!(storage.delete(&key).is_some());
        assert!(!storage.contains(&key));
        assert!(!storage.queue().is_tracked(&key));
        assert!(storage.delete(&key).is_none());
    }

    #[test]
    fn test_list() {
        let storage = storage();
        storage.add(Resource::new("a"));
        storage.add(Resource::new("b"));

        let mut names: Vec<_> = storage.list().iter().map(|r| r.name().to_string()).collect();
        names.sort();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_next_ready_after_delete_reports_missing() {
        let storage = storage();
        storage.add(Resource::new("r1"));
        storage.objects.remove(&ObjectKey::new("r1"));

        let next = storage.next_ready().await.unwrap();
        assert!(matches!(next, Err(StorageError::KeyNotExist(_))));
    }

    #[tokio::test]
    async fn test_next_ready_none_after_shutdown() {
        let storage = storage();
        storage.queue().shut_down();
        assert!(storage.next_ready().await.is_none());
    }

    #[test]
    fn test_storages_registry() {
        #[derive(Clone)]
        struct Other(Resource);
        impl ResourceObject for Other {
            fn resource(&self) -> &Resource {
                &self.0
            }
            fn resource_mut(&mut self) -> &mut Resource {
                &mut self.0
            }
        }

        let storages = Storages::new();
        assert!(storages.get::<Resource>().is_none());

        let shared = Arc::new(storage());
        shared.add(Resource::new("r1"));
        storages.set(Arc::clone(&shared));

        let found = storages.get::<Resource>().unwrap();
        assert!(found.contains(&ObjectKey::new("r1")));
        assert!(storages.get::<Other>().is_none());
        assert_eq!(storages.len(), 1);
    }

    #[test]
    fn test_storages_survive_poisoned_lock() {
        let storages = Arc::new(Storages::new());
        storages.set(Arc::new(storage()));

        let poisoner = Arc::clone(&storages);
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.store.write().unwrap();
            panic!("poison the registry");
        })
        .join();
        assert!(storages.store.is_poisoned());

        assert_eq!(storages.len(), 1);
        assert!(storages.get::<Resource>().is_some());

        storages.set(Arc::new(storage()));
        assert_eq!(storages.len(), 1);
    }
}
