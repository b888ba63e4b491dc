use snafu::Snafu;
use stackable_operator::{
    kube::{api::DynamicObject, runtime::reflector::ObjectRef},
    kvp::LabelError,
    logging::controller::ReconcilerError,
};
use strum::{EnumDiscriminants, IntoStaticStr};

use crate::store::{ObjectKey, StoreError};

#[derive(Snafu, Debug, EnumDiscriminants)]
#[strum_discriminants(derive(IntoStaticStr))]
#[allow(clippy::enum_variant_names)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("failed to get object store {key}"))]
    GetObjectStore { source: StoreError, key: ObjectKey },

    #[snafu(display("failed to update object store {key}"))]
    UpdateObjectStore { source: StoreError, key: ObjectKey },

    #[snafu(display("failed to update status of object store {key}"))]
    ApplyStatus { source: StoreError, key: ObjectKey },

    #[snafu(display("failed to get {kind} {name}"))]
    GetResource {
        source: StoreError,
        kind: String,
        name: String,
    },

    #[snafu(display("failed to create {kind} {name}"))]
    CreateResource {
        source: StoreError,
        kind: String,
        name: String,
    },

    #[snafu(display("failed to update {kind} {name}"))]
    UpdateResource {
        source: StoreError,
        kind: String,
        name: String,
    },

    #[snafu(display("failed to look up credentials secret {name}"))]
    GetCredentials { source: StoreError, name: String },

    #[snafu(display("failed to build object meta data"))]
    ObjectMeta {
        source: stackable_operator::builder::meta::Error,
    },

    #[snafu(display("object {name} is missing metadata to build owner reference"))]
    ObjectMissingMetadataForOwnerRef {
        source: stackable_operator::builder::meta::Error,
        name: String,
    },

    #[snafu(display("failed to build label"))]
    BuildLabel { source: LabelError },

    #[snafu(display("invalid annotation"))]
    InvalidAnnotation {
        source: stackable_operator::kvp::AnnotationError,
    },

    #[snafu(display("invalid container name"))]
    InvalidContainerName {
        name: String,
        source: stackable_operator::builder::pod::container::Error,
    },

    #[snafu(display("add volume mount error"))]
    AddVolumeMount {
        source: stackable_operator::builder::pod::container::Error,
    },

    #[snafu(display("add volume error"))]
    AddVolume {
        source: stackable_operator::builder::pod::Error,
    },

    #[snafu(display("object defines no namespace"))]
    ObjectHasNoNamespace,
}

impl Error {
    /// The underlying store failure, if this error came from the store.
    pub fn store_error(&self) -> Option<&StoreError> {
        match self {
            Error::GetObjectStore { source, .. }
            | Error::UpdateObjectStore { source, .. }
            | Error::ApplyStatus { source, .. }
            | Error::GetResource { source, .. }
            | Error::CreateResource { source, .. }
            | Error::UpdateResource { source, .. }
            | Error::GetCredentials { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl ReconcilerError for Error {
    fn category(&self) -> &'static str {
        ErrorDiscriminants::from(self).into()
    }

    fn secondary_object(&self) -> Option<ObjectRef<DynamicObject>> {
        None
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
