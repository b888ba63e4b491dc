use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use futures::stream::BoxStream;
use stackable_operator::k8s_openapi::api::apps::v1::Deployment;
use stackable_operator::k8s_openapi::api::core::v1::{
    PersistentVolume, PersistentVolumeClaim, Secret, Service,
};
use stackable_operator::k8s_openapi::api::networking::v1::Ingress;
use stackable_operator::logging::controller::ReconcilerError;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::controller::ObjectStoreReconciler;
use super::router::{EventRouter, Routed};
use crate::api::object_store::ObjectStore;
use crate::api::volume::ReplicatedVolume;
use crate::config::ControllerConfig;
use crate::queue::WorkQueue;
use crate::store::{ManagedResource, ObjectKey, ResourceEvent, ResourceStore};

const SYNC_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Wires the store's change notifications through the router into the work queue and drains
/// the queue with a pool of workers.
pub struct ObjectStoreController<S> {
    store: Arc<S>,
    config: Arc<ControllerConfig>,
    reconciler: ObjectStoreReconciler<S>,
    router: Arc<EventRouter<S>>,
    queue: Arc<WorkQueue<ObjectKey>>,
}

impl<S: ResourceStore> ObjectStoreController<S> {
    pub fn new(store: Arc<S>, config: ControllerConfig) -> Self {
        let config = Arc::new(config);
        let queue = WorkQueue::new(config.backoff_base, config.backoff_max);
        ObjectStoreController {
            reconciler: ObjectStoreReconciler::new(store.clone(), config.clone()),
            router: Arc::new(EventRouter::new(store.clone(), config.clone())),
            queue: Arc::new(queue),
            store,
            config,
        }
    }

    pub fn queue(&self) -> &WorkQueue<ObjectKey> {
        &self.queue
    }

    /// Runs until `stop` is cancelled.
    ///
    /// Workers only start once every watched kind has been listed. On stop the queue is shut
    /// down and running passes are allowed to finish; nothing is retried afterwards.
    pub async fn run(&self, workers: usize, stop: CancellationToken) {
        let mut tasks = JoinSet::new();

        tasks.spawn(pump_object_stores(
            self.store.subscribe::<ObjectStore>(),
            self.router.clone(),
            self.queue.clone(),
            stop.clone(),
        ));
        self.spawn_routed::<Deployment>(&mut tasks, &stop);
        self.spawn_routed::<ReplicatedVolume>(&mut tasks, &stop);
        self.spawn_routed::<Service>(&mut tasks, &stop);
        self.spawn_routed::<PersistentVolumeClaim>(&mut tasks, &stop);
        // Only read by the reconciler, the cache just has to stay warm.
        tasks.spawn(drain(self.store.subscribe::<PersistentVolume>(), stop.clone()));
        tasks.spawn(drain(self.store.subscribe::<Ingress>(), stop.clone()));
        tasks.spawn(drain(self.store.subscribe::<Secret>(), stop.clone()));
        tasks.spawn(resync(
            self.router.clone(),
            self.queue.clone(),
            self.config.resync_interval,
            stop.clone(),
        ));

        tracing::info!("waiting for caches to sync");
        if self.wait_for_sync(&stop).await {
            tracing::info!(workers, "caches synced, starting workers");
            for worker in 0..workers {
                tasks.spawn(work(self.reconciler.clone(), self.queue.clone(), worker));
            }
            stop.cancelled().await;
        }

        tracing::info!("shutting down");
        self.queue.shutdown().await;
        while let Some(joined) = tasks.join_next().await {
            if let Err(error) = joined {
                tracing::error!(%error, "controller task failed");
            }
        }
    }

    fn spawn_routed<K: Routed>(&self, tasks: &mut JoinSet<()>, stop: &CancellationToken) {
        tasks.spawn(pump(
            self.store.subscribe::<K>(),
            self.router.clone(),
            self.queue.clone(),
            stop.clone(),
        ));
    }

    /// `false` if stopped before the caches synced.
    async fn wait_for_sync(&self, stop: &CancellationToken) -> bool {
        while !self.store.has_synced() {
            tokio::select! {
                _ = stop.cancelled() => return false,
                _ = tokio::time::sleep(SYNC_POLL_INTERVAL) => {}
            }
        }
        true
    }
}

async fn pump_object_stores<S: ResourceStore>(
    mut events: BoxStream<'static, ResourceEvent<ObjectStore>>,
    router: Arc<EventRouter<S>>,
    queue: Arc<WorkQueue<ObjectKey>>,
    stop: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = stop.cancelled() => return,
            event = events.next() => event,
        };
        let Some(event) = event else { return };
        if let Some(key) = router.route_object_store(&event) {
            queue.add(key).await;
        }
    }
}

async fn pump<S: ResourceStore, K: Routed>(
    mut events: BoxStream<'static, ResourceEvent<K>>,
    router: Arc<EventRouter<S>>,
    queue: Arc<WorkQueue<ObjectKey>>,
    stop: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = stop.cancelled() => return,
            event = events.next() => event,
        };
        let Some(event) = event else { return };
        if let Some(key) = router.route(&event).await {
            queue.add(key).await;
        }
    }
}

async fn drain<K: ManagedResource>(
    mut events: BoxStream<'static, ResourceEvent<K>>,
    stop: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = stop.cancelled() => return,
            event = events.next() => {
                if event.is_none() {
                    return;
                }
            }
        }
    }
}

/// Re-enqueues every known object store each `interval`, so drift nobody was notified about
/// is still corrected.
async fn resync<S: ResourceStore>(
    router: Arc<EventRouter<S>>,
    queue: Arc<WorkQueue<ObjectKey>>,
    interval: Duration,
    stop: CancellationToken,
) {
    let mut ticks = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    loop {
        tokio::select! {
            _ = stop.cancelled() => return,
            _ = ticks.tick() => {
                let keys = router.known_keys();
                tracing::debug!(object_stores = keys.len(), "resyncing");
                for key in keys {
                    queue.add(key).await;
                }
            }
        }
    }
}

async fn work<S: ResourceStore>(
    reconciler: ObjectStoreReconciler<S>,
    queue: Arc<WorkQueue<ObjectKey>>,
    worker: usize,
) {
    while let Some(key) = queue.get().await {
        match reconciler.reconcile(&key).await {
            Ok(outcome) => {
                tracing::debug!(worker, object_store = %key, ?outcome, "reconciled");
                queue.forget(&key).await;
            }
            Err(error) => {
                tracing::error!(
                    worker,
                    object_store = %key,
                    category = error.category(),
                    error = &error as &dyn std::error::Error,
                    "reconcile failed, retrying with backoff"
                );
                queue.add_rate_limited(key.clone()).await;
            }
        }
        queue.done(&key).await;
    }
    tracing::debug!(worker, "worker stopped");
}
