//! The resource store seam between the controller and the cluster API.
//!
//! The controller only ever talks to a [`ResourceStore`]: typed get/create/update per resource
//! kind, a status write for [`ObjectStore`], and change notifications. [`kube::KubeStore`] backs
//! it with the API server and a watch-fed local cache, the in-memory `fake` store backs the unit
//! tests.

pub mod cache;
pub mod key;
pub mod kube;

#[cfg(test)]
pub mod fake;

use std::fmt::Debug;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Serialize, de::DeserializeOwned};
use snafu::Snafu;
use stackable_operator::k8s_openapi::api::apps::v1::Deployment;
use stackable_operator::k8s_openapi::api::core::v1::{
    PersistentVolume, PersistentVolumeClaim, Secret, Service,
};
use stackable_operator::k8s_openapi::api::networking::v1::Ingress;
use stackable_operator::kube::{Api, Client, Resource, ResourceExt};

use crate::api::object_store::ObjectStore;
use crate::api::volume::ReplicatedVolume;

pub use cache::{Cache, Caches};
pub use key::ObjectKey;

#[derive(Snafu, Debug)]
#[snafu(visibility(pub))]
pub enum StoreError {
    #[snafu(display("{kind} {key} not found"))]
    NotFound { kind: String, key: ObjectKey },

    #[snafu(display("{kind} {key} already exists"))]
    AlreadyExists { kind: String, key: ObjectKey },

    #[snafu(display("{kind} {key} was modified concurrently"))]
    Conflict { kind: String, key: ObjectKey },

    #[snafu(display("request for {kind} {key} failed"))]
    Api {
        source: stackable_operator::kube::Error,
        kind: String,
        key: ObjectKey,
    },

    #[snafu(display("store unavailable: {message}"))]
    Unavailable { message: String },
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, StoreError::AlreadyExists { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

pub type Result<T, E = StoreError> = std::result::Result<T, E>;

/// A change notification for one object of kind `K`.
#[derive(Clone, Debug)]
pub enum ResourceEvent<K> {
    Applied(K),
    Deleted(K),
}

impl<K> ResourceEvent<K> {
    pub fn object(&self) -> &K {
        match self {
            ResourceEvent::Applied(obj) | ResourceEvent::Deleted(obj) => obj,
        }
    }
}

/// A resource kind the controller reads or writes.
///
/// Scope is a property of the kind: namespaced kinds are addressed inside a namespace, cluster
/// scoped kinds ignore it.
pub trait ManagedResource:
    Resource<DynamicType = ()>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    const NAMESPACED: bool;

    fn kind_name() -> String {
        Self::kind(&()).into_owned()
    }

    fn api(client: Client, namespace: Option<&str>) -> Api<Self>;

    fn cache(caches: &Caches) -> &Cache<Self>;
}

macro_rules! namespaced_resource {
    ($($kind:ty => $cache:ident),+ $(,)?) => {
        $(
            impl ManagedResource for $kind {
                const NAMESPACED: bool = true;

                fn api(client: Client, namespace: Option<&str>) -> Api<Self> {
                    match namespace {
                        Some(namespace) => Api::namespaced(client, namespace),
                        None => Api::all(client),
                    }
                }

                fn cache(caches: &Caches) -> &Cache<Self> {
                    &caches.$cache
                }
            }
        )+
    };
}

macro_rules! cluster_resource {
    ($($kind:ty => $cache:ident),+ $(,)?) => {
        $(
            impl ManagedResource for $kind {
                const NAMESPACED: bool = false;

                fn api(client: Client, _namespace: Option<&str>) -> Api<Self> {
                    Api::all(client)
                }

                fn cache(caches: &Caches) -> &Cache<Self> {
                    &caches.$cache
                }
            }
        )+
    };
}

namespaced_resource!(
    ObjectStore => object_stores,
    ReplicatedVolume => volumes,
    PersistentVolumeClaim => claims,
    Deployment => deployments,
    Service => services,
    Ingress => ingresses,
    Secret => secrets,
);
cluster_resource!(PersistentVolume => persistent_volumes);

/// Typed access to the authoritative resource store.
///
/// Reads may be served from an eventually consistent local cache. Writes always go to the
/// authoritative store and are subject to optimistic concurrency through the resource version
/// carried in the object's metadata.
#[async_trait]
pub trait ResourceStore: Send + Sync + 'static {
    async fn get<K: ManagedResource>(&self, namespace: Option<&str>, name: &str) -> Result<K>;

    async fn create<K: ManagedResource>(&self, obj: &K) -> Result<K>;

    async fn update<K: ManagedResource>(&self, obj: &K) -> Result<K>;

    /// Writes the status subresource of an object store.
    async fn update_status(&self, obj: &ObjectStore) -> Result<ObjectStore>;

    /// Change notifications for every object of kind `K` visible to this controller.
    fn subscribe<K: ManagedResource>(&self) -> BoxStream<'static, ResourceEvent<K>>;

    /// Whether every subscribed kind has completed its initial listing.
    fn has_synced(&self) -> bool;
}

/// Key of `obj` as the store addresses it; cluster scoped kinds carry no namespace.
pub fn key_of<K: ManagedResource>(obj: &K) -> ObjectKey {
    key_for::<K>(obj.meta().namespace.as_deref(), &obj.name_any())
}

pub fn key_for<K: ManagedResource>(namespace: Option<&str>, name: &str) -> ObjectKey {
    ObjectKey::new(namespace.filter(|_| K::NAMESPACED), name)
}
