//! Maps change notifications to the key of the object store they concern.
//!
//! Every watched kind reaches its object store through a fixed owner chain, resolved with one
//! store lookup per hop:
//!
//! * `Deployment`, `Service`, `PersistentVolumeClaim` are owned by the object store.
//! * `ReplicatedVolume` is owned by the claim, which is owned by the object store.

use std::sync::Arc;

use dashmap::DashSet;
use stackable_operator::k8s_openapi::api::apps::v1::Deployment;
use stackable_operator::k8s_openapi::api::core::v1::{PersistentVolumeClaim, Service};
use stackable_operator::kube::{Resource, ResourceExt};

use crate::api::object_store::ObjectStore;
use crate::api::volume::ReplicatedVolume;
use crate::config::ControllerConfig;
use crate::store::{ManagedResource, ObjectKey, ResourceEvent, ResourceStore, key_of};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OwnerChain {
    /// Owned by the object store itself.
    Direct,
    /// Owned by the object store's claim.
    ViaClaim,
}

/// A dependent kind whose events are routed to the owning object store.
pub trait Routed: ManagedResource {
    const CHAIN: OwnerChain;

    /// Whether the object is managed by a different controller instance.
    fn owned_by_other(&self, _controller_id: &str) -> bool {
        false
    }
}

impl Routed for Deployment {
    const CHAIN: OwnerChain = OwnerChain::Direct;
}

impl Routed for Service {
    const CHAIN: OwnerChain = OwnerChain::Direct;
}

impl Routed for PersistentVolumeClaim {
    const CHAIN: OwnerChain = OwnerChain::Direct;
}

impl Routed for ReplicatedVolume {
    const CHAIN: OwnerChain = OwnerChain::ViaClaim;

    fn owned_by_other(&self, controller_id: &str) -> bool {
        self.owner_id().is_some_and(|owner| owner != controller_id)
    }
}

/// Name of the owner of kind `P` listed in `child`'s owner references.
fn owner_name<P, K>(child: &K) -> Option<&str>
where
    P: Resource<DynamicType = ()>,
    K: Resource,
{
    let kind = P::kind(&());
    let api_version = P::api_version(&());
    child
        .owner_references()
        .iter()
        .find(|owner| owner.kind == kind && owner.api_version == api_version)
        .map(|owner| owner.name.as_str())
}

pub struct EventRouter<S> {
    store: Arc<S>,
    config: Arc<ControllerConfig>,
    known: DashSet<ObjectKey>,
}

impl<S: ResourceStore> EventRouter<S> {
    pub fn new(store: Arc<S>, config: Arc<ControllerConfig>) -> Self {
        EventRouter {
            store,
            config,
            known: DashSet::new(),
        }
    }

    /// Object store events map to their own key. The router remembers which object stores
    /// exist so they can be resynced periodically.
    pub fn route_object_store(&self, event: &ResourceEvent<ObjectStore>) -> Option<ObjectKey> {
        let object_store = event.object();
        if !self
            .config
            .manages_namespace(object_store.namespace().as_deref())
        {
            return None;
        }
        let key = key_of(object_store);
        match event {
            ResourceEvent::Applied(_) => {
                self.known.insert(key.clone());
            }
            ResourceEvent::Deleted(_) => {
                self.known.remove(&key);
            }
        }
        Some(key)
    }

    /// Walks the owner chain of a dependent up to its object store.
    pub async fn route<K: Routed>(&self, event: &ResourceEvent<K>) -> Option<ObjectKey> {
        let obj = event.object();
        if !self.config.manages_namespace(obj.namespace().as_deref()) {
            return None;
        }
        if obj.owned_by_other(&self.config.controller_id) {
            tracing::trace!(
                kind = %K::kind_name(),
                name = %obj.name_any(),
                "ignoring event for resource of another controller"
            );
            return None;
        }

        let object_store = match K::CHAIN {
            OwnerChain::Direct => self.parent::<ObjectStore, K>(obj).await?,
            OwnerChain::ViaClaim => {
                let claim = self.parent::<PersistentVolumeClaim, K>(obj).await?;
                self.parent::<ObjectStore, _>(&claim).await?
            }
        };
        Some(key_of(&object_store))
    }

    async fn parent<P, K>(&self, child: &K) -> Option<P>
    where
        P: ManagedResource,
        K: Resource + Sync,
    {
        let name = owner_name::<P, K>(child)?;
        match self
            .store
            .get::<P>(child.namespace().as_deref(), name)
            .await
        {
            Ok(parent) => Some(parent),
            Err(err) => {
                if !err.is_not_found() {
                    tracing::debug!(
                        kind = %P::kind_name(),
                        name,
                        error = &err as &dyn std::error::Error,
                        "failed to resolve owner, dropping event"
                    );
                }
                None
            }
        }
    }

    /// Every object store seen and not deleted since.
    pub fn known_keys(&self) -> Vec<ObjectKey> {
        self.known.iter().map(|entry| entry.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objectstore::fixtures;
    use crate::store::fake::FakeStore;

    fn router(store: &Arc<FakeStore>) -> EventRouter<FakeStore> {
        let config = ControllerConfig::new("node-1").with_namespace("storage");
        EventRouter::new(store.clone(), Arc::new(config))
    }

    fn store_key() -> ObjectKey {
        ObjectKey::namespaced("storage", "store")
    }

    #[tokio::test]
    async fn test_object_store_events_map_to_own_key() {
        let store = Arc::new(FakeStore::new());
        let router = router(&store);
        let object_store = fixtures::object_store();

        let key = router.route_object_store(&ResourceEvent::Applied(object_store.clone()));
        assert_eq!(key, Some(store_key()));
        assert_eq!(router.known_keys(), vec![store_key()]);

        let key = router.route_object_store(&ResourceEvent::Deleted(object_store.clone()));
        assert_eq!(key, Some(store_key()));
        assert!(router.known_keys().is_empty());

        let mut elsewhere = object_store;
        elsewhere.metadata.namespace = Some("other".to_string());
        assert_eq!(
            router.route_object_store(&ResourceEvent::Applied(elsewhere)),
            None
        );
    }

    #[tokio::test]
    async fn test_direct_dependents_route_to_owner() {
        let store = Arc::new(FakeStore::new());
        store.insert(fixtures::object_store());
        let router = router(&store);

        let deployment = fixtures::deployment();
        assert_eq!(
            router.route(&ResourceEvent::Applied(deployment.clone())).await,
            Some(store_key())
        );
        assert_eq!(
            router.route(&ResourceEvent::Deleted(fixtures::service())).await,
            Some(store_key())
        );
        assert_eq!(
            router.route(&ResourceEvent::Applied(fixtures::claim())).await,
            Some(store_key())
        );

        let mut orphan = deployment;
        orphan.metadata.owner_references = None;
        assert_eq!(router.route(&ResourceEvent::Applied(orphan)).await, None);
    }

    #[tokio::test]
    async fn test_events_without_resolvable_owner_are_dropped() {
        let store = Arc::new(FakeStore::new());
        let router = router(&store);

        assert_eq!(
            router.route(&ResourceEvent::Applied(fixtures::deployment())).await,
            None
        );
        assert_eq!(
            router.route(&ResourceEvent::Applied(fixtures::volume())).await,
            None
        );
    }

    #[tokio::test]
    async fn test_volume_routes_through_claim() {
        let store = Arc::new(FakeStore::new());
        store.insert(fixtures::object_store());
        store.insert(fixtures::claim());
        let router = router(&store);

        assert_eq!(
            router.route(&ResourceEvent::Applied(fixtures::volume())).await,
            Some(store_key())
        );

        let mut unassigned = fixtures::volume();
        unassigned.status = None;
        assert_eq!(
            router.route(&ResourceEvent::Applied(unassigned)).await,
            Some(store_key())
        );
    }

    #[tokio::test]
    async fn test_volume_of_other_controller_is_dropped() {
        let store = Arc::new(FakeStore::new());
        store.insert(fixtures::object_store());
        store.insert(fixtures::claim());
        let router = router(&store);

        let mut foreign = fixtures::volume();
        if let Some(status) = foreign.status.as_mut() {
            status.owner_id = "node-2".to_string();
        }
        assert_eq!(router.route(&ResourceEvent::Applied(foreign)).await, None);
    }

    #[tokio::test]
    async fn test_events_outside_namespace_are_dropped() {
        let store = Arc::new(FakeStore::new());
        store.insert(fixtures::object_store());
        let router = router(&store);

        let mut service = fixtures::service();
        service.metadata.namespace = Some("other".to_string());
        assert_eq!(router.route(&ResourceEvent::Applied(service)).await, None);
    }
}
