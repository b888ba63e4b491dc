use std::sync::Arc;

use clap::{Parser, crate_description, crate_version};
use objectstore_operator::api::object_store::ObjectStore;
use objectstore_operator::built_info;
use objectstore_operator::cli::{ObjectStoreRun, Opts};
use objectstore_operator::config::ControllerConfig;
use objectstore_operator::objectstore::runner::ObjectStoreController;
use objectstore_operator::objectstore::{APP_NAME, OPERATOR_NAME};
use objectstore_operator::store::kube::KubeStore;
use stackable_operator::{
    CustomResourceExt,
    cli::{Command, ProductOperatorRun},
    client,
};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opts = Opts::parse();
    match opts.cmd {
        Command::Crd => {
            ObjectStore::print_yaml_schema(built_info::PKG_VERSION)?;
        }
        Command::Run(ObjectStoreRun {
            common:
                ProductOperatorRun {
                    watch_namespace,
                    tracing_target,
                    cluster_info_opts,
                    ..
                },
            controller,
        }) => {
            stackable_operator::logging::initialize_logging(
                "OBJECTSTORE_OPERATOR_LOG",
                APP_NAME,
                tracing_target,
            );
            stackable_operator::utils::print_startup_string(
                crate_description!(),
                crate_version!(),
                built_info::GIT_VERSION,
                built_info::TARGET,
                built_info::BUILT_TIME_UTC,
                built_info::RUSTC_VERSION,
            );
            let client =
                client::initialize_operator(Some(OPERATOR_NAME.to_string()), &cluster_info_opts)
                    .await?;
            let config = ControllerConfig::from_args(controller, &watch_namespace);
            let workers = config.workers;
            let store = Arc::new(KubeStore::new(
                client.as_kube_client(),
                config.namespace.clone(),
            ));
            let controller = ObjectStoreController::new(store, config);

            let stop = CancellationToken::new();
            tokio::spawn({
                let stop = stop.clone();
                async move {
                    if let Err(error) = tokio::signal::ctrl_c().await {
                        tracing::error!(%error, "failed to listen for shutdown signal");
                    }
                    stop.cancel();
                }
            });
            controller.run(workers, stop).await;
        }
    };

    Ok(())
}
