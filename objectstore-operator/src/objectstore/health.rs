//! Health predicates over observed dependent resources.
//!
//! A failed check is not an error of the reconcile pass. It either keeps the object store
//! waiting in `Starting` or moves a running store to `Error`.

use snafu::Snafu;
use stackable_operator::k8s_openapi::api::apps::v1::Deployment;
use stackable_operator::k8s_openapi::api::core::v1::{PersistentVolume, PersistentVolumeClaim};
use stackable_operator::kube::ResourceExt;

use crate::api::volume::{ReplicatedVolume, VolumeRobustness};

const PHASE_BOUND: &str = "Bound";

#[derive(Snafu, Debug, PartialEq, Eq)]
pub enum HealthError {
    #[snafu(display("claim {name} is not bound (phase {phase:?})"))]
    ClaimNotBound { name: String, phase: Option<String> },

    #[snafu(display("volume {name} is faulted"))]
    VolumeFaulted { name: String },

    #[snafu(display("persistent volume {name} is not bound (phase {phase:?})"))]
    PersistentVolumeNotBound { name: String, phase: Option<String> },

    #[snafu(display("deployment {name} wants {replicas} replicas instead of one"))]
    DeploymentNotSingleReplica { name: String, replicas: i32 },

    #[snafu(display(
        "deployment {name} is not ready ({replicas} replicas, {unavailable} unavailable)"
    ))]
    DeploymentNotReady {
        name: String,
        replicas: i32,
        unavailable: i32,
    },
}

pub type HealthResult = Result<(), HealthError>;

pub fn check_claim(claim: &PersistentVolumeClaim) -> HealthResult {
    let phase = claim.status.as_ref().and_then(|status| status.phase.clone());
    if phase.as_deref() != Some(PHASE_BOUND) {
        return ClaimNotBoundSnafu {
            name: claim.name_any(),
            phase,
        }
        .fail();
    }
    Ok(())
}

pub fn check_volume(volume: &ReplicatedVolume) -> HealthResult {
    if volume.robustness() == VolumeRobustness::Faulted {
        return VolumeFaultedSnafu {
            name: volume.name_any(),
        }
        .fail();
    }
    Ok(())
}

pub fn check_persistent_volume(pv: &PersistentVolume) -> HealthResult {
    let phase = pv.status.as_ref().and_then(|status| status.phase.clone());
    if phase.as_deref() != Some(PHASE_BOUND) {
        return PersistentVolumeNotBoundSnafu {
            name: pv.name_any(),
            phase,
        }
        .fail();
    }
    Ok(())
}

/// Desired replica count of a deployment; the platform defaults an unset count to one.
pub fn desired_replicas(deployment: &Deployment) -> i32 {
    deployment
        .spec
        .as_ref()
        .and_then(|spec| spec.replicas)
        .unwrap_or(1)
}

pub fn check_deployment(deployment: &Deployment) -> HealthResult {
    let name = deployment.name_any();
    let desired = desired_replicas(deployment);
    if desired != 1 {
        return DeploymentNotSingleReplicaSnafu {
            name,
            replicas: desired,
        }
        .fail();
    }

    let status = deployment.status.clone().unwrap_or_default();
    let replicas = status.replicas.unwrap_or_default();
    let unavailable = status.unavailable_replicas.unwrap_or_default();
    if replicas == 0 || unavailable > 0 {
        return DeploymentNotReadySnafu {
            name,
            replicas,
            unavailable,
        }
        .fail();
    }
    Ok(())
}
