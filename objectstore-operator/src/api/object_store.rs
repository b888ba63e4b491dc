use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use stackable_operator::k8s_openapi::api::core::v1::SecretReference;
use stackable_operator::k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use stackable_operator::kube::{CustomResource, ResourceExt};
use strum::{Display, EnumString};

use super::volume::{DataLocality, ReplicaAutoBalance};

/// Finalizer that keeps an `ObjectStore` around until the controller has seen its deletion.
pub const OBJECT_STORE_FINALIZER: &str = "objectstore.hiro.io";

/// Generate the Kubernetes wrapper struct `ObjectStore` from our Spec and Status struct
///
/// This provides a hook for generating the CRD yaml (`objectstore-operator crd`)
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[cfg_attr(test, derive(Default))]
#[kube(
    kind = "ObjectStore",
    group = "objectstore.hiro.io",
    version = "v1",
    plural = "objectstores",
    status = "ObjectStoreStatus",
    shortname = "os",
    namespaced,
    crates(
        kube_core = "stackable_operator::kube::core",
        k8s_openapi = "stackable_operator::k8s_openapi",
        schemars = "stackable_operator::schemars"
    )
)]
#[serde(rename_all = "camelCase")]
pub struct ObjectStoreSpec {
    pub size: Quantity,

    #[serde(default)]
    pub image: String,

    #[serde(default)]
    pub ui_image: String,

    #[serde(default)]
    pub credentials: SecretReference,

    #[serde(default = "ObjectStoreState::running")]
    pub target_state: ObjectStoreState,

    #[serde(default)]
    pub endpoints: Vec<ObjectStoreEndpoint>,

    #[serde(default)]
    pub volume_parameters: VolumeParameters,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ObjectStoreEndpoint {
    pub name: String,
    pub domain_name: String,
    pub tls: Option<SecretReference>,
}

impl ObjectStoreEndpoint {
    /// Name of the TLS secret, if one was configured.
    pub fn tls_secret_name(&self) -> Option<&str> {
        self.tls
            .as_ref()
            .and_then(|tls| tls.name.as_deref())
            .filter(|name| !name.is_empty())
    }
}

/// Tuning knobs passed through to the replicated volume backing the store.
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VolumeParameters {
    #[serde(default = "VolumeParameters::default_number_of_replicas")]
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

impl VolumeParameters {
    fn default_number_of_replicas() -> u32 {
        3
    }
}

impl Default for VolumeParameters {
    fn default() -> Self {
        VolumeParameters {
            number_of_replicas: Self::default_number_of_replicas(),
            replica_soft_anti_affinity: false,
            replica_zone_soft_anti_affinity: false,
            replica_disk_soft_anti_affinity: false,
            disk_selector: vec![],
            node_selector: vec![],
            data_locality: DataLocality::default(),
            from_backup: String::new(),
            stale_replica_timeout: 0,
            replica_auto_balance: ReplicaAutoBalance::default(),
            revision_counter_disabled: false,
            unmap_mark_snap_chain_removed: false,
            backend_store_driver: String::new(),
        }
    }
}

#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Deserialize,
    Display,
    EnumString,
    Eq,
    Hash,
    JsonSchema,
    PartialEq,
    Serialize,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ObjectStoreState {
    /// Not yet seen by the controller.
    #[default]
    Unknown,
    Starting,
    Running,
    Stopping,
    Stopped,
    Error,
    Terminating,
}

impl ObjectStoreState {
    fn running() -> Self {
        ObjectStoreState::Running
    }
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ObjectStoreStatus {
    #[serde(default)]
    pub state: ObjectStoreState,
    #[serde(default)]
    pub endpoints: Vec<String>,
}

impl ObjectStoreStatus {
    /// Field-by-field comparison over the status shape; decides whether a status write is due.
    pub fn differs_from(&self, other: &ObjectStoreStatus) -> bool {
        self.state != other.state || self.endpoints != other.endpoints
    }
}

impl ObjectStore {
    pub fn state(&self) -> ObjectStoreState {
        self.status
            .as_ref()
            .map(|status| status.state)
            .unwrap_or_default()
    }

    pub fn set_state(&mut self, state: ObjectStoreState) {
        self.status.get_or_insert_with(Default::default).state = state;
    }

    pub fn set_endpoints(&mut self, endpoints: Vec<String>) {
        self.status.get_or_insert_with(Default::default).endpoints = endpoints;
    }

    pub fn is_terminating(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    pub fn has_finalizer(&self) -> bool {
        self.finalizers()
            .iter()
            .any(|finalizer| finalizer == OBJECT_STORE_FINALIZER)
    }

    /// `pvc-<name>`
    pub fn claim_name(&self) -> String {
        format!("pvc-{}", self.name_any())
    }

    /// `pv-<name>`, shared by the replicated volume and the persistent volume.
    pub fn volume_name(&self) -> String {
        format!("pv-{}", self.name_any())
    }

    pub fn data_volume_mount_name(&self) -> String {
        format!("{}-data", self.name_any())
    }

    pub fn ingress_name(&self, endpoint: &ObjectStoreEndpoint) -> String {
        format!("{}-{}", self.name_any(), endpoint.name)
    }

    /// Cluster-internal host name of the store's service.
    pub fn internal_domain_name(&self) -> String {
        format!(
            "{}.{}.svc",
            self.name_any(),
            self.namespace().unwrap_or_default()
        )
    }

    /// Endpoints reported in the status: every public domain, or the internal
    /// host name when no public endpoint is configured.
    pub fn resolve_endpoints(&self) -> Vec<String> {
        let public = self
            .spec
            .endpoints
            .iter()
            .map(|endpoint| endpoint.domain_name.clone())
            .collect::<Vec<_>>();
        if public.is_empty() {
            vec![self.internal_domain_name()]
        } else {
            public
        }
    }
}
