//! In-memory index backing a mirror.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use kube::{Resource, ResourceExt};

use super::selector::Selector;

/// Identity of a namespaced object
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn of<K: Resource>(obj: &K) -> Self {
        Self::new(obj.namespace().unwrap_or_default(), obj.name_any())
    }
}

/// Objects keyed by namespace/name with a secondary index by namespace.
///
/// Stored objects are never mutated, only replaced or removed.
pub(crate) struct Store<K> {
    objects: HashMap<ObjectKey, Arc<K>>,
    by_namespace: HashMap<String, BTreeSet<String>>,
}

impl<K> Default for Store<K> {
    fn default() -> Self {
        Self {
            objects: HashMap::new(),
            by_namespace: HashMap::new(),
        }
    }
}

impl<K: Resource> Store<K> {
    pub(crate) fn upsert(&mut self, obj: K) {
        let key = ObjectKey::of(&obj);
        self.by_namespace
            .entry(key.namespace.clone())
            .or_default()
            .insert(key.name.clone());
        self.objects.insert(key, Arc::new(obj));
    }

    pub(crate) fn remove(&mut self, key: &ObjectKey) {
        if self.objects.remove(key).is_none() {
            return;
        }
        if let Some(names) = self.by_namespace.get_mut(&key.namespace) {
            names.remove(&key.name);
            if names.is_empty() {
                self.by_namespace.remove(&key.namespace);
            }
        }
    }

    /// Reconciles the index against a full listing.
    ///
    /// Keys missing from `items` are dropped; returns how many were removed.
    pub(crate) fn replace(&mut self, items: Vec<K>) -> usize {
        let listed: BTreeSet<ObjectKey> = items.iter().map(ObjectKey::of).collect();
        let stale: Vec<ObjectKey> = self
            .objects
            .keys()
            .filter(|key| !listed.contains(*key))
            .cloned()
            .collect();
        for key in &stale {
            self.remove(key);
        }
        for obj in items {
            self.upsert(obj);
        }
        stale.len()
    }

    pub(crate) fn get(&self, key: &ObjectKey) -> Option<Arc<K>> {
        self.objects.get(key).cloned()
    }

    /// Lists objects in `namespace` (all namespaces when empty) matching `selector`
    pub(crate) fn list(&self, namespace: &str, selector: &Selector) -> Vec<Arc<K>> {
        if namespace.is_empty() {
            return self
                .objects
                .values()
                .filter(|o| selector.matches(o.labels()))
                .cloned()
                .collect();
        }
        let Some(names) = self.by_namespace.get(namespace) else {
            return Vec::new();
        };
        names
            .iter()
            .filter_map(|name| self.objects.get(&ObjectKey::new(namespace, name.as_str())))
            .filter(|o| selector.matches(o.labels()))
            .cloned()
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.objects.len()
    }
}
