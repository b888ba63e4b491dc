use stackable_operator::cli::{Command, ProductOperatorRun};

use crate::config::{
    DEFAULT_OBJECT_STORE_IMAGE, DEFAULT_OBJECT_STORE_UI_IMAGE, DEFAULT_RESYNC_INTERVAL_SECS,
    DEFAULT_WORKERS,
};

#[derive(clap::Parser)]
#[clap(about, author)]
pub struct Opts {
    #[clap(subcommand)]
    pub cmd: Command<ObjectStoreRun>,
}

#[derive(clap::Parser)]
pub struct ObjectStoreRun {
    #[clap(flatten)]
    pub common: ProductOperatorRun,

    #[clap(flatten)]
    pub controller: ControllerArgs,
}

#[derive(clap::Args, Debug, PartialEq, Eq)]
pub struct ControllerArgs {
    /// Identity of this controller instance. Object stores whose volume is owned by another
    /// identity are left alone.
    #[arg(long, env = "CONTROLLER_ID")]
    pub controller_id: String,

    /// Object gateway image used when an object store does not name one.
    #[arg(long, env = "OBJECT_STORE_IMAGE", default_value = DEFAULT_OBJECT_STORE_IMAGE)]
    pub object_store_image: String,

    /// UI image used when an object store does not name one.
    #[arg(long, env = "OBJECT_STORE_UI_IMAGE", default_value = DEFAULT_OBJECT_STORE_UI_IMAGE)]
    pub object_store_ui_image: String,

    /// Image pull secret attached to every object store pod.
    #[arg(long, env = "REGISTRY_SECRET")]
    pub registry_secret: Option<String>,

    #[arg(long, env = "OBJECT_STORE_WORKERS", default_value_t = DEFAULT_WORKERS)]
    pub workers: usize,

    /// Seconds between two full resyncs of every known object store.
    #[arg(
        long,
        env = "OBJECT_STORE_RESYNC_INTERVAL",
        default_value_t = DEFAULT_RESYNC_INTERVAL_SECS,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub resync_interval: u64,
}
