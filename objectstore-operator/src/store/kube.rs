use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use serde_json::json;
use stackable_operator::kube::api::{Patch, PatchParams, PostParams};
use stackable_operator::kube::runtime::{WatchStreamExt, watcher};
use stackable_operator::kube::{self, Resource, ResourceExt};

use super::{
    Caches, ManagedResource, ObjectKey, ResourceEvent, ResourceStore, Result, StoreError,
    key_for, key_of,
};
use crate::api::object_store::ObjectStore;

/// [`ResourceStore`] backed by the Kubernetes API server.
///
/// Reads are served from the watch-fed caches once the kind has been listed, and fall back
/// to a direct GET before that. Writes always go to the API server.
#[derive(Clone)]
pub struct KubeStore {
    client: kube::Client,
    namespace: Option<String>,
    caches: Arc<Caches>,
}

impl KubeStore {
    /// `namespace` restricts every namespaced kind to that namespace, `None` watches the
    /// whole cluster.
    pub fn new(client: kube::Client, namespace: Option<String>) -> Self {
        KubeStore {
            client,
            namespace,
            caches: Arc::new(Caches::default()),
        }
    }

    fn api<K: ManagedResource>(&self, namespace: Option<&str>) -> kube::Api<K> {
        K::api(
            self.client.clone(),
            namespace.or(self.namespace.as_deref()),
        )
    }
}

#[async_trait]
impl ResourceStore for KubeStore {
    async fn get<K: ManagedResource>(&self, namespace: Option<&str>, name: &str) -> Result<K> {
        let key = key_for::<K>(namespace, name);
        let cache = K::cache(&self.caches);
        if cache.is_synced() {
            return match cache.get(&key) {
                Some(obj) => Ok(obj.as_ref().clone()),
                None => not_found::<K>(key),
            };
        }

        match self.api::<K>(namespace).get_opt(name).await {
            Ok(Some(obj)) => Ok(obj),
            Ok(None) => not_found::<K>(key),
            Err(source) => Err(classify::<K>(source, key)),
        }
    }

    async fn create<K: ManagedResource>(&self, obj: &K) -> Result<K> {
        let key = key_of(obj);
        tracing::debug!(kind = %K::kind_name(), %key, "creating resource");
        self.api::<K>(obj.meta().namespace.as_deref())
            .create(&PostParams::default(), obj)
            .await
            .map_err(|source| classify::<K>(source, key))
    }

    async fn update<K: ManagedResource>(&self, obj: &K) -> Result<K> {
        let key = key_of(obj);
        tracing::debug!(kind = %K::kind_name(), %key, "updating resource");
        self.api::<K>(obj.meta().namespace.as_deref())
            .replace(&obj.name_any(), &PostParams::default(), obj)
            .await
            .map_err(|source| classify::<K>(source, key))
    }

    async fn update_status(&self, obj: &ObjectStore) -> Result<ObjectStore> {
        let key = key_of(obj);
        tracing::debug!(%key, status = ?obj.status, "updating object store status");
        // The resource version turns the merge patch into a compare-and-swap.
        let patch = json!({
            "metadata": { "resourceVersion": obj.resource_version() },
            "status": obj.status,
        });
        self.api::<ObjectStore>(obj.meta().namespace.as_deref())
            .patch_status(&obj.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|source| classify::<ObjectStore>(source, key))
    }

    fn subscribe<K: ManagedResource>(&self) -> BoxStream<'static, ResourceEvent<K>> {
        let caches = self.caches.clone();
        K::cache(&caches).mark_watched();
        let kind = K::kind_name();

        watcher(self.api::<K>(None), watcher::Config::default())
            .default_backoff()
            .filter_map(move |event| {
                let kind = kind.clone();
                async move {
                    match event {
                        Ok(event) => Some(event),
                        Err(error) => {
                            tracing::warn!(
                                kind = %kind,
                                %error,
                                "watch stream failed, retrying"
                            );
                            None
                        }
                    }
                }
            })
            .flat_map(move |event| stream::iter(K::cache(&caches).apply(event)))
            .boxed()
    }

    fn has_synced(&self) -> bool {
        self.caches.all_synced()
    }
}

fn not_found<K: ManagedResource>(key: ObjectKey) -> Result<K> {
    Err(StoreError::NotFound {
        kind: K::kind_name(),
        key,
    })
}

/// Maps API server responses onto the store's error classes.
fn classify<K: Resource<DynamicType = ()>>(source: kube::Error, key: ObjectKey) -> StoreError {
    let kind = K::kind(&()).into_owned();
    if let kube::Error::Api(response) = &source {
        if response.code == 404 {
            return StoreError::NotFound { kind, key };
        }
        if response.reason == "AlreadyExists" {
            return StoreError::AlreadyExists { kind, key };
        }
        if response.code == 409 {
            return StoreError::Conflict { kind, key };
        }
    }
    StoreError::Api { source, kind, key }
}

#[cfg(test)]
mod tests {
    use stackable_operator::k8s_openapi::api::core::v1::PersistentVolume;
    use stackable_operator::kube::error::ErrorResponse;

    use super::*;

    fn api_error(code: u16, reason: &str) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: format!("{reason} for test"),
            reason: reason.to_string(),
            code,
        })
    }

    #[test]
    fn test_classify_api_errors() {
        let key = ObjectKey::namespaced("storage", "store");

        assert!(classify::<ObjectStore>(api_error(404, "NotFound"), key.clone()).is_not_found());
        assert!(
            classify::<ObjectStore>(api_error(409, "AlreadyExists"), key.clone())
                .is_already_exists()
        );
        assert!(classify::<ObjectStore>(api_error(409, "Conflict"), key.clone()).is_conflict());
        assert!(matches!(
            classify::<ObjectStore>(api_error(500, "InternalError"), key),
            StoreError::Api { .. }
        ));
    }

    #[test]
    fn test_cluster_scoped_keys_drop_namespace() {
        assert_eq!(
            key_for::<PersistentVolume>(Some("storage"), "pv-store"),
            ObjectKey::new(None, "pv-store")
        );
        assert_eq!(
            key_for::<ObjectStore>(Some("storage"), "store"),
            ObjectKey::namespaced("storage", "store")
        );
    }
}
