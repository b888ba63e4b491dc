use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use stackable_operator::k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use stackable_operator::kube::CustomResource;
use strum::Display;

/// Replicated block volume managed by the volume subsystem.
///
/// The object store controller only creates these and reads their status; replication,
/// attachment and ownership are handled elsewhere. `status.ownerId` names the controller
/// instance that is responsible for the volume and, by extension, for the object store
/// mounted on top of it.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(
    kind = "ReplicatedVolume",
    group = "storage.hiro.io",
    version = "v1beta2",
    plural = "replicatedvolumes",
    status = "ReplicatedVolumeStatus",
    shortname = "rv",
    namespaced,
    crates(
        kube_core = "stackable_operator::kube::core",
        k8s_openapi = "stackable_operator::k8s_openapi",
        schemars = "stackable_operator::schemars"
    )
)]
#[serde(rename_all = "camelCase")]
pub struct ReplicatedVolumeSpec {
    pub size: Quantity,
    #[serde(default)]
    pub frontend: VolumeFrontend,
    #[serde(default)]
    pub access_mode: VolumeAccessMode,
    #[serde(default)]
    pub number_of_replicas: u32,
    #[serde(default)]
    pub replica_soft_anti_affinity: bool,
    #[serde(default)]
    pub replica_zone_soft_anti_affinity: bool,
    #[serde(default)]
    pub replica_disk_soft_anti_affinity: bool,
    #[serde(default)]
    pub disk_selector: Vec<String>,
    #[serde(default)]
    pub node_selector: Vec<String>,
    #[serde(default)]
    pub data_locality: DataLocality,
    #[serde(default)]
    pub from_backup: String,
    #[serde(default)]
    pub stale_replica_timeout: u32,
    #[serde(default)]
    pub replica_auto_balance: ReplicaAutoBalance,
    #[serde(default)]
    pub revision_counter_disabled: bool,
    #[serde(default)]
    pub unmap_mark_snap_chain_removed: bool,
    #[serde(default)]
    pub backend_store_driver: String,
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReplicatedVolumeStatus {
    #[serde(default)]
    pub owner_id: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub robustness: VolumeRobustness,
}

impl ReplicatedVolume {
    /// Controller instance currently owning the volume; `None` while unassigned.
    pub fn owner_id(&self) -> Option<&str> {
        self.status
            .as_ref()
            .map(|status| status.owner_id.as_str())
            .filter(|owner| !owner.is_empty())
    }

    pub fn robustness(&self) -> VolumeRobustness {
        self.status
            .as_ref()
            .map(|status| status.robustness)
            .unwrap_or_default()
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Display, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum VolumeRobustness {
    #[default]
    Unknown,
    Healthy,
    Degraded,
    Faulted,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VolumeFrontend {
    #[default]
    Blockdev,
    Iscsi,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VolumeAccessMode {
    #[default]
    Rwo,
    Rwx,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DataLocality {
    #[default]
    Disabled,
    BestEffort,
    StrictLocal,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReplicaAutoBalance {
    #[default]
    Ignored,
    Disabled,
    LeastEffort,
    BestEffort,
}
