//! Get-or-create of the resources an object store depends on.

use snafu::{OptionExt, ResultExt};
use stackable_operator::k8s_openapi::api::apps::v1::Deployment;
use stackable_operator::k8s_openapi::api::core::v1::{
    PersistentVolume, PersistentVolumeClaim, Secret, Service,
};
use stackable_operator::k8s_openapi::api::networking::v1::Ingress;
use stackable_operator::kube::ResourceExt;
use stackable_operator::kvp::ObjectLabels;

use super::builders::{
    self, ResolvedImages, UI_CONTAINER, WORKLOAD_CONTAINER, build_recommended_labels,
    set_container_image,
};
use super::error::{
    CreateResourceSnafu, GetCredentialsSnafu, GetResourceSnafu, ObjectHasNoNamespaceSnafu,
    Result, UpdateResourceSnafu,
};
use super::health;
use crate::api::object_store::{ObjectStore, ObjectStoreState};
use crate::api::volume::ReplicatedVolume;
use crate::config::ControllerConfig;
use crate::store::{ManagedResource, ResourceStore};

/// What [`ResourceOrchestrator::reconcile_deployment_drift`] had to correct.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Drift {
    None,
    /// The replica count was put back to one.
    Scaled,
    /// A container image was replaced with the one the object store asks for.
    ImagesUpdated,
}

/// Looks up, and where missing creates, the dependents of one object store during one pass.
///
/// A successful create moves the object store to `Starting`: a new dependent is never ready yet.
pub struct ResourceOrchestrator<'a, S> {
    store: &'a S,
    config: &'a ControllerConfig,
    images: ResolvedImages,
    app_version: String,
}

impl<'a, S: ResourceStore> ResourceOrchestrator<'a, S> {
    pub fn new(store: &'a S, config: &'a ControllerConfig, object_store: &ObjectStore) -> Self {
        let images = ResolvedImages::resolve(object_store, config);
        let app_version = images.app_version_label();
        ResourceOrchestrator {
            store,
            config,
            images,
            app_version,
        }
    }

    fn labels<'b>(&'b self, object_store: &'b ObjectStore) -> ObjectLabels<'b, ObjectStore> {
        build_recommended_labels(object_store, &self.app_version)
    }

    /// `Ok(None)` when the resource does not exist.
    pub async fn lookup<K: ManagedResource>(
        &self,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<K>> {
        match self.store.get::<K>(namespace, name).await {
            Ok(obj) => Ok(Some(obj)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(source) => Err(source).context(GetResourceSnafu {
                kind: K::kind_name(),
                name,
            }),
        }
    }

    /// Like [`Self::lookup`], but a missing resource is an error too.
    pub async fn require<K: ManagedResource>(
        &self,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<K> {
        self.store
            .get::<K>(namespace, name)
            .await
            .context(GetResourceSnafu {
                kind: K::kind_name(),
                name,
            })
    }

    async fn create_missing<K: ManagedResource>(
        &self,
        object_store: &mut ObjectStore,
        desired: K,
    ) -> Result<K> {
        let kind = K::kind_name();
        let name = desired.name_any();
        match self.store.create(&desired).await {
            Ok(created) => {
                tracing::info!(
                    object_store = %object_store.name_any(),
                    kind = %kind,
                    name = %name,
                    "created dependent resource"
                );
                if object_store.state() != ObjectStoreState::Starting {
                    object_store.set_state(ObjectStoreState::Starting);
                }
                Ok(created)
            }
            Err(err) if err.is_already_exists() => {
                tracing::debug!(
                    kind = %kind,
                    name = %name,
                    "resource appeared concurrently, reading it back"
                );
                self.store
                    .get::<K>(desired.namespace().as_deref(), &name)
                    .await
                    .context(GetResourceSnafu { kind, name })
            }
            Err(source) => Err(source).context(CreateResourceSnafu { kind, name }),
        }
    }

    async fn update<K: ManagedResource>(&self, obj: &K) -> Result<K> {
        self.store
            .update(obj)
            .await
            .context(UpdateResourceSnafu {
                kind: K::kind_name(),
                name: obj.name_any(),
            })
    }

    pub async fn get_or_create_claim(
        &self,
        object_store: &mut ObjectStore,
    ) -> Result<PersistentVolumeClaim> {
        let namespace = namespace_of(object_store)?;
        let name = object_store.claim_name();
        if let Some(claim) = self.lookup(Some(&namespace), &name).await? {
            return Ok(claim);
        }
        let desired = builders::build_claim(object_store, self.labels(object_store))?;
        self.create_missing(object_store, desired).await
    }

    pub async fn get_or_create_volume(
        &self,
        object_store: &mut ObjectStore,
        claim: &PersistentVolumeClaim,
    ) -> Result<ReplicatedVolume> {
        let namespace = namespace_of(object_store)?;
        let name = object_store.volume_name();
        if let Some(volume) = self.lookup(Some(&namespace), &name).await? {
            return Ok(volume);
        }
        let desired = builders::build_volume(object_store, claim, self.labels(object_store))?;
        self.create_missing(object_store, desired).await
    }

    pub async fn get_or_create_persistent_volume(
        &self,
        object_store: &mut ObjectStore,
        volume: &ReplicatedVolume,
    ) -> Result<PersistentVolume> {
        let name = object_store.volume_name();
        if let Some(pv) = self.lookup(None, &name).await? {
            return Ok(pv);
        }
        let desired =
            builders::build_persistent_volume(object_store, volume, self.labels(object_store))?;
        self.create_missing(object_store, desired).await
    }

    /// The credential secret, if the object store names one and it exists.
    async fn credentials(&self, object_store: &ObjectStore) -> Result<Option<Secret>> {
        let Some(name) = object_store
            .spec
            .credentials
            .name
            .as_deref()
            .filter(|name| !name.is_empty())
        else {
            return Ok(None);
        };
        match self
            .store
            .get::<Secret>(object_store.namespace().as_deref(), name)
            .await
        {
            Ok(secret) => Ok(Some(secret)),
            Err(err) if err.is_not_found() => {
                tracing::debug!(
                    object_store = %object_store.name_any(),
                    secret = name,
                    "credentials secret not found, starting without default user"
                );
                Ok(None)
            }
            Err(source) => Err(source).context(GetCredentialsSnafu { name }),
        }
    }

    pub async fn get_or_create_deployment(
        &self,
        object_store: &mut ObjectStore,
    ) -> Result<Deployment> {
        let namespace = namespace_of(object_store)?;
        let name = object_store.name_any();
        if let Some(deployment) = self.lookup(Some(&namespace), &name).await? {
            return Ok(deployment);
        }
        let credentials = self.credentials(object_store).await?;
        let desired = builders::build_deployment(
            object_store,
            &self.images,
            credentials.as_ref(),
            self.config.registry_secret.as_deref(),
            self.labels(object_store),
        )?;
        self.create_missing(object_store, desired).await
    }

    pub async fn get_or_create_service(&self, object_store: &mut ObjectStore) -> Result<Service> {
        let namespace = namespace_of(object_store)?;
        let name = object_store.name_any();
        if let Some(service) = self.lookup(Some(&namespace), &name).await? {
            return Ok(service);
        }
        let desired = builders::build_service(object_store, self.labels(object_store))?;
        self.create_missing(object_store, desired).await
    }

    /// One ingress per configured endpoint, in endpoint order.
    pub async fn get_or_create_ingresses(
        &self,
        object_store: &mut ObjectStore,
    ) -> Result<Vec<Ingress>> {
        let namespace = namespace_of(object_store)?;
        let endpoints = object_store.spec.endpoints.clone();
        let mut ingresses = Vec::with_capacity(endpoints.len());
        for endpoint in &endpoints {
            let name = object_store.ingress_name(endpoint);
            let ingress = match self.lookup(Some(&namespace), &name).await? {
                Some(ingress) => ingress,
                None => {
                    let desired =
                        builders::build_ingress(object_store, endpoint, self.labels(object_store))?;
                    self.create_missing(object_store, desired).await?
                }
            };
            ingresses.push(ingress);
        }
        Ok(ingresses)
    }

    pub async fn scale_deployment(
        &self,
        deployment: &Deployment,
        replicas: i32,
    ) -> Result<Deployment> {
        let mut scaled = deployment.clone();
        scaled.spec.get_or_insert_with(Default::default).replicas = Some(replicas);
        tracing::info!(deployment = %deployment.name_any(), replicas, "scaling deployment");
        self.update(&scaled).await
    }

    /// Puts the replica count back to one, or else the container images back to the resolved
    /// ones. At most one correction is written per call.
    pub async fn reconcile_deployment_drift(&self, deployment: &Deployment) -> Result<Drift> {
        if health::desired_replicas(deployment) != 1 {
            self.scale_deployment(deployment, 1).await?;
            return Ok(Drift::Scaled);
        }

        let mut desired = deployment.clone();
        let workload_changed =
            set_container_image(&mut desired, WORKLOAD_CONTAINER, &self.images.workload);
        let ui_changed = set_container_image(&mut desired, UI_CONTAINER, &self.images.ui);
        if workload_changed || ui_changed {
            tracing::info!(
                deployment = %deployment.name_any(),
                workload = %self.images.workload,
                ui = %self.images.ui,
                "updating deployment images"
            );
            self.update(&desired).await?;
            return Ok(Drift::ImagesUpdated);
        }
        Ok(Drift::None)
    }
}

fn namespace_of(object_store: &ObjectStore) -> Result<String> {
    object_store.namespace().context(ObjectHasNoNamespaceSnafu)
}
