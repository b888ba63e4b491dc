//! Watch-fed local caches, one per resource kind.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use stackable_operator::k8s_openapi::api::apps::v1::Deployment;
use stackable_operator::k8s_openapi::api::core::v1::{
    PersistentVolume, PersistentVolumeClaim, Secret, Service,
};
use stackable_operator::k8s_openapi::api::networking::v1::Ingress;
use stackable_operator::kube::Resource;
use stackable_operator::kube::runtime::watcher;

use super::{ObjectKey, ResourceEvent};
use crate::api::object_store::ObjectStore;
use crate::api::volume::ReplicatedVolume;

/// Last observed state of every object of kind `K`.
///
/// Initial listings (and every re-list after a watch desync) are buffered and swapped in once
/// complete, so readers never see a half-listed cache.
pub struct Cache<K> {
    objects: DashMap<ObjectKey, Arc<K>>,
    relist: DashMap<ObjectKey, Arc<K>>,
    watched: AtomicBool,
    synced: AtomicBool,
}

impl<K> Default for Cache<K> {
    fn default() -> Self {
        Cache {
            objects: DashMap::new(),
            relist: DashMap::new(),
            watched: AtomicBool::new(false),
            synced: AtomicBool::new(false),
        }
    }
}

impl<K: Resource + Clone> Cache<K> {
    pub fn get(&self, key: &ObjectKey) -> Option<Arc<K>> {
        self.objects.get(key).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn is_synced(&self) -> bool {
        self.synced.load(Ordering::Acquire)
    }

    pub fn is_watched(&self) -> bool {
        self.watched.load(Ordering::Acquire)
    }

    pub(crate) fn mark_watched(&self) {
        self.watched.store(true, Ordering::Release);
    }

    /// Applies a watcher event and returns the change notifications it implies.
    ///
    /// Objects that vanished between two listings surface as deletions when the re-list
    /// completes.
    pub fn apply(&self, event: watcher::Event<K>) -> Vec<ResourceEvent<K>> {
        match event {
            watcher::Event::Apply(obj) => {
                self.objects
                    .insert(ObjectKey::from_obj(&obj), Arc::new(obj.clone()));
                vec![ResourceEvent::Applied(obj)]
            }
            watcher::Event::Delete(obj) => {
                self.objects.remove(&ObjectKey::from_obj(&obj));
                vec![ResourceEvent::Deleted(obj)]
            }
            watcher::Event::Init => {
                self.relist.clear();
                vec![]
            }
            watcher::Event::InitApply(obj) => {
                self.relist
                    .insert(ObjectKey::from_obj(&obj), Arc::new(obj.clone()));
                vec![ResourceEvent::Applied(obj)]
            }
            watcher::Event::InitDone => {
                let mut gone = vec![];
                self.objects.retain(|key, obj| {
                    let keep = self.relist.contains_key(key);
                    if !keep {
                        gone.push(ResourceEvent::Deleted(obj.as_ref().clone()));
                    }
                    keep
                });
                let listed = self
                    .relist
                    .iter()
                    .map(|entry| (entry.key().clone(), entry.value().clone()))
                    .collect::<Vec<_>>();
                self.relist.clear();
                for (key, obj) in listed {
                    self.objects.insert(key, obj);
                }
                self.synced.store(true, Ordering::Release);
                gone
            }
        }
    }
}

/// The caches of every kind the controller works with.
#[derive(Default)]
pub struct Caches {
    pub object_stores: Cache<ObjectStore>,
    pub volumes: Cache<ReplicatedVolume>,
    pub claims: Cache<PersistentVolumeClaim>,
    pub persistent_volumes: Cache<PersistentVolume>,
    pub deployments: Cache<Deployment>,
    pub services: Cache<Service>,
    pub ingresses: Cache<Ingress>,
    pub secrets: Cache<Secret>,
}

impl Caches {
    /// True once at least one kind is watched and every watched kind finished its initial
    /// listing.
    pub fn all_synced(&self) -> bool {
        let states = [
            (self.object_stores.is_watched(), self.object_stores.is_synced()),
            (self.volumes.is_watched(), self.volumes.is_synced()),
            (self.claims.is_watched(), self.claims.is_synced()),
            (
                self.persistent_volumes.is_watched(),
                self.persistent_volumes.is_synced(),
            ),
            (self.deployments.is_watched(), self.deployments.is_synced()),
            (self.services.is_watched(), self.services.is_synced()),
            (self.ingresses.is_watched(), self.ingresses.is_synced()),
            (self.secrets.is_watched(), self.secrets.is_synced()),
        ];
        states.iter().any(|(watched, _)| *watched)
            && states.iter().all(|(watched, synced)| !watched || *synced)
    }
}

#[cfg(test)]
mod tests {
    use stackable_operator::k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    use super::*;

    fn service(name: &str) -> Service {
        Service {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("storage".to_string()),
                ..ObjectMeta::default()
            },
            ..Service::default()
        }
    }

    fn key(name: &str) -> ObjectKey {
        ObjectKey::namespaced("storage", name)
    }

    #[test]
    fn test_initial_listing_is_swapped_in_when_done() {
        let cache = Cache::<Service>::default();
        assert!(cache.apply(watcher::Event::Init).is_empty());

        let events = cache.apply(watcher::Event::InitApply(service("a")));
        assert!(matches!(events.as_slice(), [ResourceEvent::Applied(_)]));
        assert!(cache.get(&key("a")).is_none());
        assert!(!cache.is_synced());

        assert!(cache.apply(watcher::Event::InitDone).is_empty());
        assert!(cache.is_synced());
        assert!(cache.get(&key("a")).is_some());
    }

    #[test]
    fn test_relist_drops_vanished_objects() {
        let cache = Cache::<Service>::default();
        cache.apply(watcher::Event::Init);
        cache.apply(watcher::Event::InitApply(service("a")));
        cache.apply(watcher::Event::InitApply(service("b")));
        cache.apply(watcher::Event::InitDone);
        assert_eq!(cache.len(), 2);

        cache.apply(watcher::Event::Init);
        cache.apply(watcher::Event::InitApply(service("b")));
        let events = cache.apply(watcher::Event::InitDone);

        assert_eq!(cache.len(), 1);
        assert!(cache.get(&key("a")).is_none());
        match events.as_slice() {
            [ResourceEvent::Deleted(svc)] => {
                assert_eq!(svc.metadata.name.as_deref(), Some("a"))
            }
            other => panic!("unexpected events {other:?}"),
        }
    }

    #[test]
    fn test_apply_and_delete() {
        let cache = Cache::<Service>::default();
        cache.apply(watcher::Event::Apply(service("a")));
        assert!(cache.get(&key("a")).is_some());

        let events = cache.apply(watcher::Event::Delete(service("a")));
        assert!(matches!(events.as_slice(), [ResourceEvent::Deleted(_)]));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_all_synced_only_considers_watched_kinds() {
        let caches = Caches::default();
        assert!(!caches.all_synced());

        caches.services.mark_watched();
        assert!(!caches.all_synced());

        caches.services.apply(watcher::Event::Init);
        caches.services.apply(watcher::Event::InitDone);
        assert!(caches.all_synced());
    }
}
