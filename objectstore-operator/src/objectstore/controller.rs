//! The reconcile pass: one state handler per object store state.

use std::sync::Arc;

use snafu::ResultExt;
use stackable_operator::k8s_openapi::api::apps::v1::Deployment;
use stackable_operator::k8s_openapi::api::core::v1::{
    PersistentVolume, PersistentVolumeClaim, Service,
};
use stackable_operator::k8s_openapi::api::networking::v1::Ingress;
use stackable_operator::kube::ResourceExt;

use super::arbiter;
use super::error::{ApplyStatusSnafu, GetObjectStoreSnafu, Result, UpdateObjectStoreSnafu};
use super::health::{self, HealthResult};
use super::resources::{Drift, ResourceOrchestrator};
use crate::api::object_store::{OBJECT_STORE_FINALIZER, ObjectStore, ObjectStoreState};
use crate::api::volume::ReplicatedVolume;
use crate::config::ControllerConfig;
use crate::store::{ObjectKey, ResourceStore, key_of};

/// Where the termination of an object store stands after a pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TerminationProgress {
    /// The state was just moved to `Terminating`.
    Marked,
    FinalizerRemoved,
    /// Dependents still exist; the platform is cascading the deletion.
    WaitingForDependents,
    Complete,
}

/// Result of a successful pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The key does not resolve to an object store (anymore).
    Gone,
    /// Another controller instance owns the backing volume.
    NotResponsible,
    Reconciled(ObjectStoreState),
    Terminating(TerminationProgress),
}

/// Dependents a running object store is checked against.
struct Observed {
    deployment: Deployment,
    claim: PersistentVolumeClaim,
    volume: ReplicatedVolume,
    persistent_volume: PersistentVolume,
}

impl Observed {
    fn check_health(&self) -> HealthResult {
        health::check_claim(&self.claim)?;
        health::check_volume(&self.volume)?;
        health::check_persistent_volume(&self.persistent_volume)?;
        health::check_deployment(&self.deployment)
    }
}

pub struct ObjectStoreReconciler<S> {
    store: Arc<S>,
    config: Arc<ControllerConfig>,
}

impl<S> Clone for ObjectStoreReconciler<S> {
    fn clone(&self) -> Self {
        ObjectStoreReconciler {
            store: self.store.clone(),
            config: self.config.clone(),
        }
    }
}

impl<S: ResourceStore> ObjectStoreReconciler<S> {
    pub fn new(store: Arc<S>, config: Arc<ControllerConfig>) -> Self {
        ObjectStoreReconciler { store, config }
    }

    /// Runs one pass for `key` and writes the status back if the pass changed it.
    ///
    /// The status is written even when the state handler failed, so that a store moved to
    /// `Error` says so. If both fail the handler's error is returned.
    pub async fn reconcile(&self, key: &ObjectKey) -> Result<Outcome> {
        tracing::info!(object_store = %key, "Starting reconcile");

        let mut object_store = match self
            .store
            .get::<ObjectStore>(key.namespace.as_deref(), &key.name)
            .await
        {
            Ok(object_store) => object_store,
            Err(err) if err.is_not_found() => {
                tracing::debug!(object_store = %key, "object store is gone, nothing to do");
                return Ok(Outcome::Gone);
            }
            Err(source) => return Err(source).context(GetObjectStoreSnafu { key: key.clone() }),
        };

        if !arbiter::is_responsible(
            self.store.as_ref(),
            &self.config.controller_id,
            &object_store,
        )
        .await
        {
            tracing::debug!(object_store = %key, "volume is owned by another controller");
            return Ok(Outcome::NotResponsible);
        }

        let snapshot = object_store.status.clone().unwrap_or_default();
        let result = self.dispatch(&mut object_store).await;

        let status = object_store.status.clone().unwrap_or_default();
        if status.differs_from(&snapshot) {
            let written = self
                .store
                .update_status(&object_store)
                .await
                .context(ApplyStatusSnafu { key: key.clone() });
            match (&result, written) {
                (_, Ok(_)) => tracing::info!(
                    object_store = %key,
                    from = %snapshot.state,
                    to = %status.state,
                    "updated status"
                ),
                (Ok(_), Err(err)) => return Err(err),
                (Err(_), Err(err)) => tracing::warn!(
                    object_store = %key,
                    error = &err as &dyn std::error::Error,
                    "failed to record status of failed pass"
                ),
            }
        }
        result
    }

    async fn dispatch(&self, object_store: &mut ObjectStore) -> Result<Outcome> {
        if object_store.is_terminating() {
            let progress = self.handle_terminating(object_store).await?;
            return Ok(Outcome::Terminating(progress));
        }

        let target = object_store.spec.target_state;
        match object_store.state() {
            ObjectStoreState::Unknown if target == ObjectStoreState::Stopped => {}
            ObjectStoreState::Unknown => {
                object_store.set_state(ObjectStoreState::Starting);
                self.handle_starting(object_store).await?;
            }
            ObjectStoreState::Starting | ObjectStoreState::Error => {
                self.handle_starting(object_store).await?;
            }
            ObjectStoreState::Running => self.handle_running(object_store).await?,
            ObjectStoreState::Stopping => self.handle_stopping(object_store).await?,
            ObjectStoreState::Stopped => {
                if target == ObjectStoreState::Running {
                    object_store.set_state(ObjectStoreState::Starting);
                }
            }
            // The deletion timestamp is gone again; start over.
            ObjectStoreState::Terminating => object_store.set_state(ObjectStoreState::Starting),
        }
        Ok(Outcome::Reconciled(object_store.state()))
    }

    fn orchestrator(&self, object_store: &ObjectStore) -> ResourceOrchestrator<'_, S> {
        ResourceOrchestrator::new(self.store.as_ref(), &self.config, object_store)
    }

    async fn ensure_finalizer(&self, object_store: &mut ObjectStore) -> Result<()> {
        if object_store.has_finalizer() {
            return Ok(());
        }
        let mut desired = object_store.clone();
        desired
            .finalizers_mut()
            .push(OBJECT_STORE_FINALIZER.to_string());
        let updated = self
            .store
            .update(&desired)
            .await
            .context(UpdateObjectStoreSnafu {
                key: key_of(object_store),
            })?;
        object_store.metadata = updated.metadata;
        Ok(())
    }

    /// Shared by `Starting` and `Error`: create what is missing, then wait for health.
    async fn handle_starting(&self, object_store: &mut ObjectStore) -> Result<()> {
        self.ensure_finalizer(object_store).await?;

        let orchestrator = self.orchestrator(object_store);
        let claim = orchestrator.get_or_create_claim(object_store).await?;
        let volume = orchestrator
            .get_or_create_volume(object_store, &claim)
            .await?;
        let persistent_volume = orchestrator
            .get_or_create_persistent_volume(object_store, &volume)
            .await?;
        let deployment = orchestrator.get_or_create_deployment(object_store).await?;
        orchestrator.get_or_create_service(object_store).await?;
        orchestrator.get_or_create_ingresses(object_store).await?;
        object_store.set_endpoints(object_store.resolve_endpoints());

        match orchestrator.reconcile_deployment_drift(&deployment).await? {
            Drift::None => {}
            Drift::Scaled => return Ok(()),
            Drift::ImagesUpdated => {
                object_store.set_state(ObjectStoreState::Starting);
                return Ok(());
            }
        }

        let observed = Observed {
            deployment,
            claim,
            volume,
            persistent_volume,
        };
        if let Err(unhealthy) = observed.check_health() {
            tracing::debug!(
                object_store = %object_store.name_any(),
                reason = %unhealthy,
                "waiting for dependents to become ready"
            );
            return Ok(());
        }
        object_store.set_state(ObjectStoreState::Running);
        Ok(())
    }

    async fn observe(
        &self,
        orchestrator: &ResourceOrchestrator<'_, S>,
        object_store: &ObjectStore,
    ) -> Result<Observed> {
        let namespace = object_store.namespace();
        let namespace = namespace.as_deref();
        let deployment = orchestrator
            .require::<Deployment>(namespace, &object_store.name_any())
            .await?;
        orchestrator
            .require::<Service>(namespace, &object_store.name_any())
            .await?;
        let claim = orchestrator
            .require::<PersistentVolumeClaim>(namespace, &object_store.claim_name())
            .await?;
        let volume = orchestrator
            .require::<ReplicatedVolume>(namespace, &object_store.volume_name())
            .await?;
        let persistent_volume = orchestrator
            .require::<PersistentVolume>(None, &object_store.volume_name())
            .await?;
        for endpoint in &object_store.spec.endpoints {
            orchestrator
                .require::<Ingress>(namespace, &object_store.ingress_name(endpoint))
                .await?;
        }
        Ok(Observed {
            deployment,
            claim,
            volume,
            persistent_volume,
        })
    }

    async fn handle_running(&self, object_store: &mut ObjectStore) -> Result<()> {
        if object_store.spec.target_state == ObjectStoreState::Stopped {
            object_store.set_state(ObjectStoreState::Stopping);
            return Ok(());
        }

        let orchestrator = self.orchestrator(object_store);
        let observed = match self.observe(&orchestrator, object_store).await {
            Ok(observed) => observed,
            Err(err) => {
                object_store.set_state(ObjectStoreState::Error);
                return Err(err);
            }
        };

        let drift = match orchestrator
            .reconcile_deployment_drift(&observed.deployment)
            .await
        {
            Ok(drift) => drift,
            Err(err) => {
                object_store.set_state(ObjectStoreState::Error);
                return Err(err);
            }
        };
        match drift {
            Drift::None => {}
            Drift::Scaled => {
                tracing::warn!(
                    object_store = %object_store.name_any(),
                    "deployment was scaled away from one replica"
                );
                object_store.set_state(ObjectStoreState::Error);
                return Ok(());
            }
            Drift::ImagesUpdated => {
                object_store.set_state(ObjectStoreState::Starting);
                return Ok(());
            }
        }

        if let Err(unhealthy) = observed.check_health() {
            tracing::warn!(
                object_store = %object_store.name_any(),
                reason = %unhealthy,
                "running object store became unhealthy"
            );
            object_store.set_state(ObjectStoreState::Error);
            return Ok(());
        }
        object_store.set_endpoints(object_store.resolve_endpoints());
        Ok(())
    }

    async fn handle_stopping(&self, object_store: &mut ObjectStore) -> Result<()> {
        let orchestrator = self.orchestrator(object_store);
        let deployment = match orchestrator
            .require::<Deployment>(object_store.namespace().as_deref(), &object_store.name_any())
            .await
        {
            Ok(deployment) => deployment,
            Err(err) => {
                object_store.set_state(ObjectStoreState::Error);
                return Err(err);
            }
        };

        if health::desired_replicas(&deployment) != 0 {
            orchestrator.scale_deployment(&deployment, 0).await?;
            return Ok(());
        }
        let available = deployment
            .status
            .as_ref()
            .and_then(|status| status.available_replicas)
            .unwrap_or_default();
        if available > 0 {
            tracing::debug!(
                object_store = %object_store.name_any(),
                available,
                "waiting for gateway pods to shut down"
            );
            return Ok(());
        }
        object_store.set_state(ObjectStoreState::Stopped);
        Ok(())
    }

    async fn handle_terminating(
        &self,
        object_store: &mut ObjectStore,
    ) -> Result<TerminationProgress> {
        if object_store.state() != ObjectStoreState::Terminating {
            object_store.set_state(ObjectStoreState::Terminating);
            return Ok(TerminationProgress::Marked);
        }

        if object_store.has_finalizer() {
            let mut desired = object_store.clone();
            desired
                .finalizers_mut()
                .retain(|finalizer| finalizer != OBJECT_STORE_FINALIZER);
            let updated = self
                .store
                .update(&desired)
                .await
                .context(UpdateObjectStoreSnafu {
                    key: key_of(object_store),
                })?;
            object_store.metadata = updated.metadata;
            tracing::info!(object_store = %object_store.name_any(), "removed finalizer");
            return Ok(TerminationProgress::FinalizerRemoved);
        }

        let orchestrator = self.orchestrator(object_store);
        let namespace = object_store.namespace();
        let namespace = namespace.as_deref();
        let name = object_store.name_any();
        let waiting = orchestrator.lookup::<Service>(namespace, &name).await?.is_some()
            || orchestrator
                .lookup::<Deployment>(namespace, &name)
                .await?
                .is_some()
            || orchestrator
                .lookup::<PersistentVolumeClaim>(namespace, &object_store.claim_name())
                .await?
                .is_some()
            || orchestrator
                .lookup::<PersistentVolume>(None, &object_store.volume_name())
                .await?
                .is_some()
            || orchestrator
                .lookup::<ReplicatedVolume>(namespace, &object_store.volume_name())
                .await?
                .is_some();
        if waiting {
            return Ok(TerminationProgress::WaitingForDependents);
        }
        tracing::info!(object_store = %name, "termination complete");
        Ok(TerminationProgress::Complete)
    }
}
