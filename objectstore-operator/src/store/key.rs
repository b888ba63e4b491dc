use std::fmt;

use stackable_operator::kube::{Resource, ResourceExt};

/// Identity of an object in the store: `namespace/name`, or just `name` for cluster scoped
/// objects. Also the reconcile key handed through the work queue.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: Option<&str>, name: &str) -> ObjectKey {
        ObjectKey {
            namespace: namespace.map(str::to_owned),
            name: name.to_owned(),
        }
    }

    pub fn namespaced(namespace: &str, name: &str) -> ObjectKey {
        ObjectKey::new(Some(namespace), name)
    }

    pub fn from_obj<K: Resource>(obj: &K) -> ObjectKey {
        ObjectKey {
            namespace: obj.namespace(),
            name: obj.name_any(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(namespace) => write!(f, "{namespace}/{}", self.name),
            None => write!(f, "{}", self.name),
        }
    }
}
