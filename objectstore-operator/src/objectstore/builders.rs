//! Pure builders from an `ObjectStore` to the resources it needs.

use snafu::{OptionExt, ResultExt};
use stackable_operator::builder::meta::ObjectMetaBuilder;
use stackable_operator::builder::pod::PodBuilder;
use stackable_operator::builder::pod::container::ContainerBuilder;
use stackable_operator::k8s_openapi::api::apps::v1::{
    Deployment, DeploymentSpec, DeploymentStrategy,
};
use stackable_operator::k8s_openapi::api::core::v1::{
    CSIPersistentVolumeSource, ContainerPort, EnvFromSource, LocalObjectReference, ObjectReference,
    PersistentVolume, PersistentVolumeClaim, PersistentVolumeClaimSpec,
    PersistentVolumeClaimVolumeSource, PersistentVolumeSpec, Secret, SecretEnvSource, Service,
    ServicePort, ServiceSpec, Volume, VolumeMount, VolumeResourceRequirements,
};
use stackable_operator::k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, IngressTLS, ServiceBackendPort,
};
use stackable_operator::k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use stackable_operator::k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use stackable_operator::kube::ResourceExt;
use stackable_operator::kvp::{Annotations, Labels, ObjectLabels};

use super::error::{
    AddVolumeMountSnafu, AddVolumeSnafu, BuildLabelSnafu, InvalidAnnotationSnafu,
    InvalidContainerNameSnafu, ObjectHasNoNamespaceSnafu, ObjectMetaSnafu,
    ObjectMissingMetadataForOwnerRefSnafu, Result,
};
use super::{APP_NAME, CONTROLLER_NAME, OPERATOR_NAME, ROLE_GROUP_NAME, ROLE_NAME};
use crate::api::object_store::{ObjectStore, ObjectStoreEndpoint};
use crate::api::volume::{ReplicatedVolume, ReplicatedVolumeSpec, VolumeAccessMode, VolumeFrontend};
use crate::config::ControllerConfig;

pub const WORKLOAD_CONTAINER: &str = "s3gw";
pub const UI_CONTAINER: &str = "s3gw-ui";
pub const STORAGE_CLASS_NAME: &str = "objectstore-static";
pub const CSI_DRIVER: &str = "driver.storage.hiro.io";
pub const OBJECT_STORE_NAME_ANNOTATION: &str = "objectstore.hiro.io/object-store-name";
pub const DATA_MOUNT_PATH: &str = "/data";

pub const S3_PORT_NAME: &str = "s3";
pub const UI_PORT_NAME: &str = "ui";
pub const STATUS_PORT_NAME: &str = "status";
pub const S3_SERVICE_PORT: i32 = 80;
pub const S3_CONTAINER_PORT: i32 = 7480;
pub const UI_PORT: i32 = 8080;
pub const STATUS_PORT: i32 = 9090;

const LOG_LEVEL: u8 = 1;
const TELEMETRY_ENV: &str = "RGW_S3GW_ENABLE_TELEMETRY";
const READ_WRITE_ONCE: &str = "ReadWriteOnce";
const STORAGE_RESOURCE: &str = "storage";
// xfs with reflink allows copy-on-write clones; reflink requires crc.
const FS_TYPE: &str = "xfs";
const MKFS_PARAMS: &str = "-f -m crc=1 -m reflink=1";

/// Container images an object store runs with.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedImages {
    pub workload: String,
    pub ui: String,
}

impl ResolvedImages {
    /// The object store's own images, falling back to the controller defaults.
    pub fn resolve(object_store: &ObjectStore, config: &ControllerConfig) -> Self {
        fn pick(requested: &str, default: &str) -> String {
            if requested.is_empty() {
                default.to_string()
            } else {
                requested.to_string()
            }
        }
        ResolvedImages {
            workload: pick(&object_store.spec.image, &config.object_store_image),
            ui: pick(&object_store.spec.ui_image, &config.ui_image),
        }
    }

    /// Tag of the workload image, made safe for use as a label value.
    pub fn app_version_label(&self) -> String {
        let reference = self.workload.rsplit('/').next().unwrap_or_default();
        let reference = reference
            .split_once('@')
            .map_or(reference, |(name, _digest)| name);
        let tag = reference.split_once(':').map_or("latest", |(_, tag)| tag);
        let label = tag
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                    c
                } else {
                    '-'
                }
            })
            .take(63)
            .collect::<String>();
        let label = label.trim_matches(|c: char| !c.is_ascii_alphanumeric());
        if label.is_empty() {
            "latest".to_string()
        } else {
            label.to_string()
        }
    }
}

pub fn build_recommended_labels<'a>(
    owner: &'a ObjectStore,
    app_version: &'a str,
) -> ObjectLabels<'a, ObjectStore> {
    ObjectLabels {
        owner,
        app_name: APP_NAME,
        app_version,
        operator_name: OPERATOR_NAME,
        controller_name: CONTROLLER_NAME,
        role: ROLE_NAME,
        role_group: ROLE_GROUP_NAME,
    }
}

/// Labels selecting the pods of an object store.
pub fn selector_labels(object_store: &ObjectStore) -> Result<Labels> {
    Labels::role_group_selector(object_store, APP_NAME, ROLE_NAME, ROLE_GROUP_NAME)
        .context(BuildLabelSnafu)
}

fn owned_metadata(
    object_store: &ObjectStore,
    name: String,
    labels: ObjectLabels<ObjectStore>,
) -> Result<ObjectMetaBuilder> {
    let mut builder = ObjectMetaBuilder::new();
    builder
        .name_and_namespace(object_store)
        .name(name)
        .ownerreference_from_resource(object_store, None, Some(true))
        .context(ObjectMissingMetadataForOwnerRefSnafu {
            name: object_store.name_any(),
        })?
        .with_recommended_labels(labels)
        .context(ObjectMetaSnafu)?;
    Ok(builder)
}

pub fn build_claim(
    object_store: &ObjectStore,
    labels: ObjectLabels<ObjectStore>,
) -> Result<PersistentVolumeClaim> {
    let metadata = owned_metadata(object_store, object_store.claim_name(), labels)?.build();

    Ok(PersistentVolumeClaim {
        metadata,
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec![READ_WRITE_ONCE.to_string()]),
            resources: Some(VolumeResourceRequirements {
                requests: Some(
                    [(
                        STORAGE_RESOURCE.to_string(),
                        object_store.spec.size.clone(),
                    )]
                    .into(),
                ),
                ..VolumeResourceRequirements::default()
            }),
            storage_class_name: Some(STORAGE_CLASS_NAME.to_string()),
            volume_name: Some(object_store.volume_name()),
            ..PersistentVolumeClaimSpec::default()
        }),
        status: None,
    })
}

/// The replicated volume is owned by the claim, so it goes away with the claim.
pub fn build_volume(
    object_store: &ObjectStore,
    claim: &PersistentVolumeClaim,
    labels: ObjectLabels<ObjectStore>,
) -> Result<ReplicatedVolume> {
    let metadata = ObjectMetaBuilder::new()
        .name_and_namespace(object_store)
        .name(object_store.volume_name())
        .ownerreference_from_resource(claim, None, Some(true))
        .context(ObjectMissingMetadataForOwnerRefSnafu {
            name: claim.name_any(),
        })?
        .annotations(
            Annotations::try_from([(OBJECT_STORE_NAME_ANNOTATION, object_store.name_any())])
                .context(InvalidAnnotationSnafu)?,
        )
        .with_recommended_labels(labels)
        .context(ObjectMetaSnafu)?
        .build();

    let parameters = &object_store.spec.volume_parameters;
    Ok(ReplicatedVolume {
        metadata,
        spec: ReplicatedVolumeSpec {
            size: object_store.spec.size.clone(),
            frontend: VolumeFrontend::Blockdev,
            access_mode: VolumeAccessMode::Rwo,
            number_of_replicas: parameters.number_of_replicas,
            replica_soft_anti_affinity: parameters.replica_soft_anti_affinity,
            replica_zone_soft_anti_affinity: parameters.replica_zone_soft_anti_affinity,
            replica_disk_soft_anti_affinity: parameters.replica_disk_soft_anti_affinity,
            disk_selector: parameters.disk_selector.clone(),
            node_selector: parameters.node_selector.clone(),
            data_locality: parameters.data_locality,
            from_backup: parameters.from_backup.clone(),
            stale_replica_timeout: parameters.stale_replica_timeout,
            replica_auto_balance: parameters.replica_auto_balance,
            revision_counter_disabled: parameters.revision_counter_disabled,
            unmap_mark_snap_chain_removed: parameters.unmap_mark_snap_chain_removed,
            backend_store_driver: parameters.backend_store_driver.clone(),
        },
        status: None,
    })
}

/// Cluster scoped and unowned: reclaiming the storage is left to the administrator.
pub fn build_persistent_volume(
    object_store: &ObjectStore,
    volume: &ReplicatedVolume,
    labels: ObjectLabels<ObjectStore>,
) -> Result<PersistentVolume> {
    let namespace = object_store
        .namespace()
        .context(ObjectHasNoNamespaceSnafu)?;
    let metadata = ObjectMetaBuilder::new()
        .name(object_store.volume_name())
        .with_recommended_labels(labels)
        .context(ObjectMetaSnafu)?
        .build();

    Ok(PersistentVolume {
        metadata,
        spec: Some(PersistentVolumeSpec {
            access_modes: Some(vec![READ_WRITE_ONCE.to_string()]),
            capacity: Some(
                [(
                    STORAGE_RESOURCE.to_string(),
                    object_store.spec.size.clone(),
                )]
                .into(),
            ),
            storage_class_name: Some(STORAGE_CLASS_NAME.to_string()),
            persistent_volume_reclaim_policy: Some("Retain".to_string()),
            volume_mode: Some("Filesystem".to_string()),
            claim_ref: Some(ObjectReference {
                api_version: Some("v1".to_string()),
                kind: Some("PersistentVolumeClaim".to_string()),
                namespace: Some(namespace),
                name: Some(object_store.claim_name()),
                ..ObjectReference::default()
            }),
            csi: Some(CSIPersistentVolumeSource {
                driver: CSI_DRIVER.to_string(),
                volume_handle: volume.name_any(),
                fs_type: Some(FS_TYPE.to_string()),
                volume_attributes: Some(
                    [("mkfsParams".to_string(), MKFS_PARAMS.to_string())].into(),
                ),
                ..CSIPersistentVolumeSource::default()
            }),
            ..PersistentVolumeSpec::default()
        }),
        status: None,
    })
}

pub fn workload_args(object_store: &ObjectStore) -> Vec<String> {
    let mut args = vec![
        "--rgw-backend-store".to_string(),
        "sfs".to_string(),
        "--debug-rgw".to_string(),
        LOG_LEVEL.to_string(),
        "--rgw_frontends".to_string(),
        format!("beast port={S3_CONTAINER_PORT}, status port={STATUS_PORT}"),
        "--rgw-dns-name".to_string(),
        object_store.internal_domain_name(),
    ];
    for endpoint in &object_store.spec.endpoints {
        args.push("--rgw-dns-name".to_string());
        args.push(endpoint.domain_name.clone());
    }
    args
}

fn tcp_port(name: &str, port: i32) -> ContainerPort {
    ContainerPort {
        container_port: port,
        name: Some(name.to_string()),
        protocol: Some("TCP".to_string()),
        ..ContainerPort::default()
    }
}

/// `credentials` is the credential secret if it exists; its keys become the gateway's
/// environment.
pub fn build_deployment(
    object_store: &ObjectStore,
    images: &ResolvedImages,
    credentials: Option<&Secret>,
    registry_secret: Option<&str>,
    labels: ObjectLabels<ObjectStore>,
) -> Result<Deployment> {
    let mut workload =
        ContainerBuilder::new(WORKLOAD_CONTAINER).context(InvalidContainerNameSnafu {
            name: WORKLOAD_CONTAINER.to_string(),
        })?;
    workload
        .image(&images.workload)
        .args(workload_args(object_store))
        .add_env_var(TELEMETRY_ENV, "true")
        .add_container_ports(vec![
            tcp_port(S3_PORT_NAME, S3_CONTAINER_PORT),
            tcp_port(STATUS_PORT_NAME, STATUS_PORT),
        ])
        .add_volume_mounts(vec![VolumeMount {
            name: object_store.data_volume_mount_name(),
            mount_path: DATA_MOUNT_PATH.to_string(),
            ..VolumeMount::default()
        }])
        .context(AddVolumeMountSnafu)?;
    let mut workload = workload.build();
    if let Some(secret) = credentials {
        workload.env_from = Some(vec![EnvFromSource {
            secret_ref: Some(SecretEnvSource {
                name: secret.name_any(),
                optional: None,
            }),
            ..EnvFromSource::default()
        }]);
    }

    let mut ui = ContainerBuilder::new(UI_CONTAINER).context(InvalidContainerNameSnafu {
        name: UI_CONTAINER.to_string(),
    })?;
    ui.image(&images.ui)
        .add_env_var(
            "S3GW_SERVICE_URL",
            format!("http://127.0.0.1:{S3_CONTAINER_PORT}"),
        )
        .add_env_var(
            "S3GW_UI_PATH",
            format!("/objectstore/{}", object_store.name_any()),
        )
        .add_env_var("S3GW_INSTANCE_ID", object_store.name_any())
        .add_container_ports(vec![tcp_port(UI_PORT_NAME, UI_PORT)]);

    let pod_metadata = ObjectMetaBuilder::new()
        .with_recommended_labels(labels.clone())
        .context(ObjectMetaSnafu)?
        .build();

    let mut pod_builder = PodBuilder::new();
    pod_builder
        .metadata(pod_metadata)
        .add_container(workload)
        .add_container(ui.build())
        .add_volume(Volume {
            name: object_store.data_volume_mount_name(),
            persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                claim_name: object_store.claim_name(),
                read_only: None,
            }),
            ..Volume::default()
        })
        .context(AddVolumeSnafu)?;

    let mut template = pod_builder.build_template();
    if let (Some(secret), Some(pod_spec)) = (registry_secret, template.spec.as_mut()) {
        pod_spec.image_pull_secrets = Some(vec![LocalObjectReference {
            name: secret.to_string(),
        }]);
    }

    let metadata = owned_metadata(object_store, object_store.name_any(), labels)?.build();

    Ok(Deployment {
        metadata,
        spec: Some(DeploymentSpec {
            // The volume attaches to a single node, so one gateway and no rolling updates.
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(selector_labels(object_store)?.into()),
                ..LabelSelector::default()
            },
            strategy: Some(DeploymentStrategy {
                type_: Some("Recreate".to_string()),
                rolling_update: None,
            }),
            template,
            ..DeploymentSpec::default()
        }),
        status: None,
    })
}

fn service_port(name: &str, port: i32, target_port: i32) -> ServicePort {
    ServicePort {
        name: Some(name.to_string()),
        port,
        target_port: Some(IntOrString::Int(target_port)),
        protocol: Some("TCP".to_string()),
        ..ServicePort::default()
    }
}

pub fn build_service(
    object_store: &ObjectStore,
    labels: ObjectLabels<ObjectStore>,
) -> Result<Service> {
    let metadata = owned_metadata(object_store, object_store.name_any(), labels)?.build();

    Ok(Service {
        metadata,
        spec: Some(ServiceSpec {
            ports: Some(vec![
                service_port(S3_PORT_NAME, S3_SERVICE_PORT, S3_CONTAINER_PORT),
                service_port(UI_PORT_NAME, UI_PORT, UI_PORT),
                service_port(STATUS_PORT_NAME, STATUS_PORT, STATUS_PORT),
            ]),
            selector: Some(selector_labels(object_store)?.into()),
            ..ServiceSpec::default()
        }),
        status: None,
    })
}

fn s3_rule(object_store: &ObjectStore, host: String) -> IngressRule {
    IngressRule {
        host: Some(host),
        http: Some(HTTPIngressRuleValue {
            paths: vec![HTTPIngressPath {
                path: Some("/".to_string()),
                path_type: "Prefix".to_string(),
                backend: IngressBackend {
                    service: Some(IngressServiceBackend {
                        name: object_store.name_any(),
                        port: Some(ServiceBackendPort {
                            name: Some(S3_PORT_NAME.to_string()),
                            number: None,
                        }),
                    }),
                    resource: None,
                },
            }],
        }),
    }
}

/// Routes `domain` and every subdomain of it (virtual-hosted buckets) to the S3 port.
pub fn build_ingress(
    object_store: &ObjectStore,
    endpoint: &ObjectStoreEndpoint,
    labels: ObjectLabels<ObjectStore>,
) -> Result<Ingress> {
    let metadata =
        owned_metadata(object_store, object_store.ingress_name(endpoint), labels)?.build();
    let host = endpoint.domain_name.clone();
    let wildcard = format!("*.{host}");

    Ok(Ingress {
        metadata,
        spec: Some(IngressSpec {
            rules: Some(vec![
                s3_rule(object_store, host.clone()),
                s3_rule(object_store, wildcard.clone()),
            ]),
            tls: endpoint.tls_secret_name().map(|secret| {
                vec![IngressTLS {
                    hosts: Some(vec![host, wildcard]),
                    secret_name: Some(secret.to_string()),
                }]
            }),
            ..IngressSpec::default()
        }),
        status: None,
    })
}

pub fn container_image<'a>(deployment: &'a Deployment, container: &str) -> Option<&'a str> {
    deployment
        .spec
        .as_ref()?
        .template
        .spec
        .as_ref()?
        .containers
        .iter()
        .find(|c| c.name == container)?
        .image
        .as_deref()
}

/// Sets the image of `container`; returns whether anything changed.
pub fn set_container_image(deployment: &mut Deployment, container: &str, image: &str) -> bool {
    let Some(target) = deployment
        .spec
        .as_mut()
        .and_then(|spec| spec.template.spec.as_mut())
        .and_then(|pod| pod.containers.iter_mut().find(|c| c.name == container))
    else {
        return false;
    };
    if target.image.as_deref() == Some(image) {
        return false;
    }
    target.image = Some(image.to_string());
    true
}
