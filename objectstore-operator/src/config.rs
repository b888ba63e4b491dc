use std::time::Duration;

use stackable_operator::namespace::WatchNamespace;

use crate::cli::ControllerArgs;
use crate::queue::{DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY};

pub const DEFAULT_OBJECT_STORE_IMAGE: &str = "quay.io/s3gw/s3gw:latest";
pub const DEFAULT_OBJECT_STORE_UI_IMAGE: &str = "quay.io/s3gw/s3gw-ui:latest";
pub const DEFAULT_WORKERS: usize = 5;
pub const DEFAULT_RESYNC_INTERVAL_SECS: u64 = 60 * 60;

/// Runtime settings of one controller instance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ControllerConfig {
    pub controller_id: String,
    /// Namespace the controller manages; `None` manages every namespace.
    pub namespace: Option<String>,
    pub object_store_image: String,
    pub ui_image: String,
    pub registry_secret: Option<String>,
    pub workers: usize,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub resync_interval: Duration,
}

impl ControllerConfig {
    pub fn new(controller_id: impl Into<String>) -> Self {
        ControllerConfig {
            controller_id: controller_id.into(),
            namespace: None,
            object_store_image: DEFAULT_OBJECT_STORE_IMAGE.to_string(),
            ui_image: DEFAULT_OBJECT_STORE_UI_IMAGE.to_string(),
            registry_secret: None,
            workers: DEFAULT_WORKERS,
            backoff_base: DEFAULT_BASE_DELAY,
            backoff_max: DEFAULT_MAX_DELAY,
            resync_interval: Duration::from_secs(DEFAULT_RESYNC_INTERVAL_SECS),
        }
    }

    pub fn from_args(args: ControllerArgs, watch_namespace: &WatchNamespace) -> Self {
        let namespace = match watch_namespace {
            WatchNamespace::All => None,
            WatchNamespace::One(namespace) => Some(namespace.clone()),
        };
        ControllerConfig {
            controller_id: args.controller_id,
            namespace,
            object_store_image: args.object_store_image,
            ui_image: args.object_store_ui_image,
            registry_secret: args.registry_secret.filter(|secret| !secret.is_empty()),
            workers: args.workers.max(1),
            resync_interval: Duration::from_secs(args.resync_interval.max(1)),
            ..ControllerConfig::new(String::new())
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_registry_secret(mut self, secret: impl Into<String>) -> Self {
        self.registry_secret = Some(secret.into());
        self
    }

    /// Whether resources in `namespace` fall under this controller.
    pub fn manages_namespace(&self, namespace: Option<&str>) -> bool {
        match &self.namespace {
            Some(managed) => namespace == Some(managed.as_str()),
            None => true,
        }
    }
}
