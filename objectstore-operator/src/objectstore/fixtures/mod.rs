use serde::de::DeserializeOwned;
use stackable_operator::k8s_openapi::api::apps::v1::Deployment;
use stackable_operator::k8s_openapi::api::core::v1::{
    PersistentVolume, PersistentVolumeClaim, Secret, Service,
};
use stackable_operator::kvp::ObjectLabels;

use super::builders::build_recommended_labels;
use crate::api::object_store::ObjectStore;
use crate::api::volume::ReplicatedVolume;

pub const OBJECT_STORE: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/src/objectstore/fixtures/object_store.yaml"
));

pub const OBJECT_STORE_ENDPOINTS: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/src/objectstore/fixtures/object_store_endpoints.yaml"
));

pub const CLAIM: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/src/objectstore/fixtures/claim.yaml"
));

pub const VOLUME: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/src/objectstore/fixtures/volume.yaml"
));

pub const PERSISTENT_VOLUME: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/src/objectstore/fixtures/persistent_volume.yaml"
));

pub const DEPLOYMENT: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/src/objectstore/fixtures/deployment.yaml"
));

pub const SERVICE: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/src/objectstore/fixtures/service.yaml"
));

pub const SECRET: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/src/objectstore/fixtures/secret.yaml"
));

fn parse<K: DeserializeOwned>(yaml: &str) -> K {
    serde_yaml::from_str(yaml).expect("illegal input yaml")
}

/// `store` in namespace `storage`, no status yet.
pub fn object_store() -> ObjectStore {
    parse(OBJECT_STORE)
}

/// Like [`object_store`], with a TLS `public` endpoint and a plain `internal` one.
pub fn object_store_with_endpoints() -> ObjectStore {
    parse(OBJECT_STORE_ENDPOINTS)
}

/// Bound.
pub fn claim() -> PersistentVolumeClaim {
    parse(CLAIM)
}

/// Healthy, owned by controller `node-1`.
pub fn volume() -> ReplicatedVolume {
    parse(VOLUME)
}

/// Bound.
pub fn persistent_volume() -> PersistentVolume {
    parse(PERSISTENT_VOLUME)
}

/// One available replica running the default images.
pub fn deployment() -> Deployment {
    parse(DEPLOYMENT)
}

pub fn service() -> Service {
    parse(SERVICE)
}

pub fn secret() -> Secret {
    parse(SECRET)
}

pub fn labels(object_store: &ObjectStore) -> ObjectLabels<'_, ObjectStore> {
    build_recommended_labels(object_store, "latest")
}
