//! In-memory [`ResourceStore`] for unit tests.
//!
//! Objects are held as JSON so that every kind shares one map. The store mimics the parts of
//! API server behaviour the controller relies on: resource versions, status subresource
//! semantics, finalizer-driven removal and change notifications.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use serde_json::{Value, json};
use tokio::sync::broadcast;

use super::{
    ManagedResource, ObjectKey, ResourceEvent, ResourceStore, Result, StoreError, key_for, key_of,
};
use crate::api::object_store::ObjectStore;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verb {
    Get,
    Create,
    Update,
    UpdateStatus,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Action {
    pub verb: Verb,
    pub kind: String,
    pub key: ObjectKey,
}

#[derive(Clone, Debug)]
struct Notification {
    kind: String,
    deleted: bool,
    object: Value,
}

#[derive(Default)]
struct State {
    objects: BTreeMap<(String, ObjectKey), Value>,
    actions: Vec<Action>,
    failures: Vec<(Verb, String, String)>,
    version: u64,
}

impl State {
    fn next_version(&mut self) -> String {
        self.version += 1;
        self.version.to_string()
    }

    fn record(&mut self, verb: Verb, kind: &str, key: &ObjectKey) -> Result<()> {
        self.actions.push(Action {
            verb,
            kind: kind.to_string(),
            key: key.clone(),
        });
        let injected = self
            .failures
            .iter()
            .any(|(v, k, name)| *v == verb && k == kind && *name == key.name);
        if injected {
            return Err(StoreError::Unavailable {
                message: format!("injected {verb:?} failure for {kind} {key}"),
            });
        }
        Ok(())
    }
}

pub struct FakeStore {
    state: Mutex<State>,
    events: broadcast::Sender<Notification>,
}

impl Default for FakeStore {
    fn default() -> Self {
        FakeStore::new()
    }
}

impl FakeStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(1024);
        FakeStore {
            state: Mutex::new(State::default()),
            events,
        }
    }

    /// Stores `obj` as-is (status included) without recording an action.
    pub fn insert<K: ManagedResource>(&self, obj: K) -> K {
        let kind = K::kind_name();
        let key = key_of(&obj);
        let mut value = to_value(&obj);
        let mut state = self.state.lock().unwrap();
        let version = state.next_version();
        stamp(&mut value, &kind, &key, &version);
        state.objects.insert((kind.clone(), key), value.clone());
        drop(state);
        self.notify(kind, false, value.clone());
        from_value(value)
    }

    pub fn object<K: ManagedResource>(&self, namespace: Option<&str>, name: &str) -> Option<K> {
        let key = (K::kind_name(), key_for::<K>(namespace, name));
        self.state
            .lock()
            .unwrap()
            .objects
            .get(&key)
            .cloned()
            .map(from_value)
    }

    pub fn contains<K: ManagedResource>(&self, namespace: Option<&str>, name: &str) -> bool {
        self.object::<K>(namespace, name).is_some()
    }

    /// Edits a stored object in place, status included, as another actor would.
    pub fn modify<K: ManagedResource>(
        &self,
        namespace: Option<&str>,
        name: &str,
        edit: impl FnOnce(&mut K),
    ) {
        let mut obj = self
            .object::<K>(namespace, name)
            .unwrap_or_else(|| panic!("{} {name} not stored", K::kind_name()));
        edit(&mut obj);
        self.insert(obj);
    }

    /// Removes an object immediately, like a completed cascade deletion.
    pub fn remove<K: ManagedResource>(&self, namespace: Option<&str>, name: &str) {
        let kind = K::kind_name();
        let removed = self
            .state
            .lock()
            .unwrap()
            .objects
            .remove(&(kind.clone(), key_for::<K>(namespace, name)));
        if let Some(value) = removed {
            self.notify(kind, true, value);
        }
    }

    /// Requests deletion: sets the deletion timestamp, removing the object right away when
    /// no finalizer holds it.
    pub fn mark_deleted<K: ManagedResource>(&self, namespace: Option<&str>, name: &str) {
        let kind = K::kind_name();
        let key = (kind.clone(), key_for::<K>(namespace, name));
        let mut state = self.state.lock().unwrap();
        let Some(mut value) = state.objects.remove(&key) else {
            return;
        };
        value["metadata"]["deletionTimestamp"] = json!("2026-01-01T00:00:00Z");
        let version = state.next_version();
        value["metadata"]["resourceVersion"] = json!(version);
        let deleted = !has_finalizers(&value);
        if !deleted {
            state.objects.insert(key, value.clone());
        }
        drop(state);
        self.notify(kind, deleted, value);
    }

    pub fn fail_on(&self, verb: Verb, kind: &str, name: &str) {
        self.state
            .lock()
            .unwrap()
            .failures
            .push((verb, kind.to_string(), name.to_string()));
    }

    pub fn clear_failures(&self) {
        self.state.lock().unwrap().failures.clear();
    }

    pub fn actions(&self) -> Vec<Action> {
        self.state.lock().unwrap().actions.clone()
    }

    /// Every recorded action except reads.
    pub fn writes(&self) -> Vec<Action> {
        self.actions()
            .into_iter()
            .filter(|action| action.verb != Verb::Get)
            .collect()
    }

    pub fn clear_actions(&self) {
        self.state.lock().unwrap().actions.clear();
    }

    fn notify(&self, kind: String, deleted: bool, object: Value) {
        // No receivers is fine.
        let _ = self.events.send(Notification {
            kind,
            deleted,
            object,
        });
    }

    fn store_update(&self, kind: String, key: ObjectKey, value: Value) -> Value {
        let deleted =
            !value["metadata"]["deletionTimestamp"].is_null() && !has_finalizers(&value);
        let mut state = self.state.lock().unwrap();
        if deleted {
            state.objects.remove(&(kind.clone(), key));
        } else {
            state.objects.insert((kind.clone(), key), value.clone());
        }
        drop(state);
        self.notify(kind, deleted, value.clone());
        value
    }
}

#[async_trait]
impl ResourceStore for FakeStore {
    async fn get<K: ManagedResource>(&self, namespace: Option<&str>, name: &str) -> Result<K> {
        let kind = K::kind_name();
        let key = key_for::<K>(namespace, name);
        let mut state = self.state.lock().unwrap();
        state.record(Verb::Get, &kind, &key)?;
        match state.objects.get(&(kind.clone(), key.clone())) {
            Some(value) => Ok(from_value(value.clone())),
            None => Err(StoreError::NotFound { kind, key }),
        }
    }

    async fn create<K: ManagedResource>(&self, obj: &K) -> Result<K> {
        let kind = K::kind_name();
        let key = key_of(obj);
        let mut value = to_value(obj);
        let mut state = self.state.lock().unwrap();
        state.record(Verb::Create, &kind, &key)?;
        if state.objects.contains_key(&(kind.clone(), key.clone())) {
            return Err(StoreError::AlreadyExists { kind, key });
        }
        let version = state.next_version();
        stamp(&mut value, &kind, &key, &version);
        state
            .objects
            .insert((kind.clone(), key), value.clone());
        drop(state);
        self.notify(kind, false, value.clone());
        Ok(from_value(value))
    }

    async fn update<K: ManagedResource>(&self, obj: &K) -> Result<K> {
        let kind = K::kind_name();
        let key = key_of(obj);
        let mut value = to_value(obj);
        let mut state = self.state.lock().unwrap();
        state.record(Verb::Update, &kind, &key)?;
        let Some(stored) = state.objects.get(&(kind.clone(), key.clone())) else {
            return Err(StoreError::NotFound { kind, key });
        };
        check_version(&value, stored, &kind, &key)?;
        // Status belongs to the status subresource.
        value["status"] = stored["status"].clone();
        if value["metadata"]["uid"].is_null() {
            value["metadata"]["uid"] = stored["metadata"]["uid"].clone();
        }
        value["metadata"]["resourceVersion"] = json!(state.next_version());
        drop(state);
        Ok(from_value(self.store_update(kind, key, value)))
    }

    async fn update_status(&self, obj: &ObjectStore) -> Result<ObjectStore> {
        let kind = ObjectStore::kind_name();
        let key = key_of(obj);
        let value = to_value(obj);
        let mut state = self.state.lock().unwrap();
        state.record(Verb::UpdateStatus, &kind, &key)?;
        let Some(stored) = state.objects.get(&(kind.clone(), key.clone())) else {
            return Err(StoreError::NotFound { kind, key });
        };
        check_version(&value, stored, &kind, &key)?;
        let mut updated = stored.clone();
        updated["status"] = value["status"].clone();
        updated["metadata"]["resourceVersion"] = json!(state.next_version());
        drop(state);
        Ok(from_value(self.store_update(kind, key, updated)))
    }

    /// Replays the stored objects of the kind as applied, then follows later changes.
    fn subscribe<K: ManagedResource>(&self) -> BoxStream<'static, ResourceEvent<K>> {
        let kind = K::kind_name();
        let receiver = self.events.subscribe();
        let existing = self
            .state
            .lock()
            .unwrap()
            .objects
            .iter()
            .filter(|((stored_kind, _), _)| *stored_kind == kind)
            .map(|(_, value)| ResourceEvent::Applied(from_value::<K>(value.clone())))
            .collect::<Vec<_>>();
        let changes = stream::unfold((receiver, kind), |(mut receiver, kind)| async move {
            loop {
                match receiver.recv().await {
                    Ok(notification) if notification.kind == kind => {
                        let obj = from_value::<K>(notification.object);
                        let event = if notification.deleted {
                            ResourceEvent::Deleted(obj)
                        } else {
                            ResourceEvent::Applied(obj)
                        };
                        return Some((event, (receiver, kind)));
                    }
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });
        stream::iter(existing).chain(changes).boxed()
    }

    fn has_synced(&self) -> bool {
        true
    }
}

fn to_value<K: ManagedResource>(obj: &K) -> Value {
    serde_json::to_value(obj).expect("resource serializes to json")
}

fn from_value<K: ManagedResource>(value: Value) -> K {
    serde_json::from_value(value).expect("stored json deserializes")
}

fn stamp(value: &mut Value, kind: &str, key: &ObjectKey, version: &str) {
    if value["metadata"]["uid"].is_null() {
        value["metadata"]["uid"] = json!(format!("uid-{}-{}", kind.to_lowercase(), key.name));
    }
    value["metadata"]["resourceVersion"] = json!(version);
}

fn has_finalizers(value: &Value) -> bool {
    value["metadata"]["finalizers"]
        .as_array()
        .is_some_and(|finalizers| !finalizers.is_empty())
}

fn check_version(value: &Value, stored: &Value, kind: &str, key: &ObjectKey) -> Result<()> {
    let requested = &value["metadata"]["resourceVersion"];
    if !requested.is_null() && *requested != stored["metadata"]["resourceVersion"] {
        return Err(StoreError::Conflict {
            kind: kind.to_string(),
            key: key.clone(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use stackable_operator::k8s_openapi::api::core::v1::Service;
    use stackable_operator::kube::ResourceExt;

    use super::*;
    use crate::api::object_store::ObjectStoreState;
    use crate::objectstore::fixtures;

    #[tokio::test]
    async fn test_update_keeps_status_and_checks_version() {
        let store = FakeStore::new();
        let mut object_store = fixtures::object_store();
        object_store.set_state(ObjectStoreState::Running);
        let stored = store.insert(object_store);

        let mut edited = stored.clone();
        edited.set_state(ObjectStoreState::Error);
        edited.metadata.labels = Some([("a".to_string(), "b".to_string())].into());
        let updated = store.update(&edited).await.expect("update");
        assert_eq!(updated.state(), ObjectStoreState::Running);
        assert_eq!(updated.labels().get("a").map(String::as_str), Some("b"));

        // `stored` carries the old resource version now.
        let err = store.update_status(&stored).await.expect_err("stale write");
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_finalizer_removal_deletes_marked_object() {
        let store = FakeStore::new();
        let mut object_store = fixtures::object_store();
        object_store.metadata.finalizers = Some(vec!["objectstore.hiro.io".to_string()]);
        store.insert(object_store);
        store.mark_deleted::<ObjectStore>(Some("storage"), "store");

        let mut marked: ObjectStore = store.get(Some("storage"), "store").await.expect("held");
        assert!(marked.is_terminating());

        marked.metadata.finalizers = Some(vec![]);
        store.update(&marked).await.expect("update");
        assert!(!store.contains::<ObjectStore>(Some("storage"), "store"));
    }

    #[tokio::test]
    async fn test_injected_failures_and_duplicates() {
        let store = FakeStore::new();
        store.fail_on(Verb::Get, "Service", "store");

        let err = store
            .get::<Service>(Some("storage"), "store")
            .await
            .expect_err("injected");
        assert!(matches!(err, StoreError::Unavailable { .. }));

        store.clear_failures();
        let err = store
            .get::<Service>(Some("storage"), "store")
            .await
            .expect_err("missing");
        assert!(err.is_not_found());

        let svc = fixtures::service();
        store.create(&svc).await.expect("create");
        let err = store.create(&svc).await.expect_err("duplicate");
        assert!(err.is_already_exists());
    }
}
