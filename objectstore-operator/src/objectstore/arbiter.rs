//! Decides which controller instance may act on an object store.
//!
//! Every instance watches every object store, but only the instance that owns the backing
//! replicated volume mutates it. A store without a volume (or whose volume has no owner yet)
//! is fair game, which is how the volume gets created in the first place.

use stackable_operator::kube::ResourceExt;

use crate::api::object_store::ObjectStore;
use crate::api::volume::ReplicatedVolume;
use crate::store::ResourceStore;

pub async fn is_responsible<S: ResourceStore>(
    store: &S,
    controller_id: &str,
    object_store: &ObjectStore,
) -> bool {
    let volume_name = object_store.volume_name();
    let volume = match store
        .get::<ReplicatedVolume>(object_store.namespace().as_deref(), &volume_name)
        .await
    {
        Ok(volume) => volume,
        Err(err) if err.is_not_found() => return true,
        Err(err) => {
            tracing::warn!(
                object_store = %object_store.name_any(),
                volume = %volume_name,
                error = &err as &dyn std::error::Error,
                "failed to look up volume, leaving object store alone"
            );
            return false;
        }
    };

    match volume.owner_id() {
        None => true,
        Some(owner) => owner == controller_id,
    }
}
