//! In-memory cluster store for tests
//!
//! [`MemoryStore`] behaves like the API server where the operator relies on
//! it: uids and resourceVersions are assigned on write, stale writes fail
//! with a conflict, status is only written through `update_status`, and
//! deleting an object with finalizers only sets its deletion timestamp.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::api::{ApiResource, DynamicObject};
use parking_lot::Mutex;
use serde_json::Value;

use crate::store::{from_dynamic, to_dynamic, Managed, ObjectKey, ObjectStore};
use crate::{Error, Result};

/// Kind of write recorded in the operation log
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    /// Object created
    Create,
    /// Object replaced
    Update,
    /// Status replaced
    UpdateStatus,
    /// Object deleted or marked for deletion
    Delete,
}

/// One recorded write
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Recorded {
    /// What happened
    pub operation: Operation,
    /// Kind of the object
    pub kind: String,
    /// Key of the object
    pub key: ObjectKey,
}

type TypeKey = (String, String);

/// In-memory [`ObjectStore`]
#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<(TypeKey, ObjectKey), DynamicObject>>,
    log: Mutex<Vec<Recorded>>,
    failures: Mutex<Vec<(Operation, String)>>,
    version: AtomicU64,
}

fn type_key(ar: &ApiResource) -> TypeKey {
    (ar.api_version.clone(), ar.kind.clone())
}

fn spec_part(obj: &DynamicObject) -> Value {
    let mut data = obj.data.clone();
    if let Some(map) = data.as_object_mut() {
        map.remove("status");
    }
    data
}

fn matches_selector(obj: &DynamicObject, selector: &str) -> bool {
    let labels = obj.metadata.labels.clone().unwrap_or_default();
    selector
        .split(',')
        .filter(|s| !s.is_empty())
        .all(|term| match term.split_once('=') {
            Some((k, v)) => labels.get(k.trim()).map(String::as_str) == Some(v.trim()),
            None => labels.contains_key(term.trim()),
        })
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    fn next_version(&self) -> String {
        (self.version.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    fn record(&self, operation: Operation, ar: &ApiResource, key: &ObjectKey) {
        self.log.lock().push(Recorded {
            operation,
            kind: ar.kind.clone(),
            key: key.clone(),
        });
    }

    fn injected_failure(&self, operation: Operation, ar: &ApiResource, key: &ObjectKey) -> Result<()> {
        let mut failures = self.failures.lock();
        if let Some(pos) = failures
            .iter()
            .position(|(op, kind)| *op == operation && *kind == ar.kind)
        {
            failures.remove(pos);
            return Err(Error::conflict(&ar.kind, key.to_string()));
        }
        Ok(())
    }

    /// Make the next `operation` on `kind` fail with a conflict
    pub fn fail_next(&self, operation: Operation, kind: &str) {
        self.failures.lock().push((operation, kind.to_string()));
    }

    /// Insert an object directly, assigning server fields; not logged
    pub fn seed<K: Managed>(&self, obj: &K) -> K {
        let ar = ApiResource::erase::<K>(&());
        let mut dynamic = match to_dynamic(obj) {
            Ok(d) => d,
            Err(e) => panic!("seed object does not serialize: {e}"),
        };
        let key = match ObjectKey::of(&dynamic) {
            Ok(k) => k,
            Err(e) => panic!("seed object has no key: {e}"),
        };
        self.assign_server_fields(&mut dynamic);
        self.objects
            .lock()
            .insert((type_key(&ar), key), dynamic.clone());
        match from_dynamic(dynamic) {
            Ok(k) => k,
            Err(e) => panic!("seed object does not round-trip: {e}"),
        }
    }

    fn assign_server_fields(&self, obj: &mut DynamicObject) {
        let uid = format!("uid-{}", self.version.load(Ordering::SeqCst) + 1);
        obj.metadata.uid.get_or_insert(uid);
        obj.metadata.generation.get_or_insert(1);
        obj.metadata
            .creation_timestamp
            .get_or_insert_with(|| Time(chrono::Utc::now()));
        obj.metadata.resource_version = Some(self.next_version());
    }

    /// Typed copy of a stored object
    pub fn object<K: Managed>(&self, key: &ObjectKey) -> Option<K> {
        let ar = ApiResource::erase::<K>(&());
        let obj = self
            .objects
            .lock()
            .get(&(type_key(&ar), key.clone()))
            .cloned()?;
        from_dynamic(obj).ok()
    }

    /// True if an object of kind `K` exists at `key`
    pub fn contains<K: Managed>(&self, key: &ObjectKey) -> bool {
        let ar = ApiResource::erase::<K>(&());
        self.objects
            .lock()
            .contains_key(&(type_key(&ar), key.clone()))
    }

    /// All recorded writes, oldest first
    pub fn operations(&self) -> Vec<Recorded> {
        self.log.lock().clone()
    }

    /// Number of recorded `operation`s on objects of `kind`
    pub fn count(&self, operation: Operation, kind: &str) -> usize {
        self.log
            .lock()
            .iter()
            .filter(|r| r.operation == operation && r.kind == kind)
            .count()
    }

    /// Forget recorded writes
    pub fn clear_operations(&self) {
        self.log.lock().clear();
    }

    fn check_version(&self, ar: &ApiResource, key: &ObjectKey, stored: &DynamicObject, incoming: &DynamicObject) -> Result<()> {
        match incoming.metadata.resource_version.as_deref() {
            Some(rv) if Some(rv) != stored.metadata.resource_version.as_deref() => {
                Err(Error::conflict(&ar.kind, key.to_string()))
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get(&self, ar: &ApiResource, key: &ObjectKey) -> Result<Option<DynamicObject>> {
        Ok(self
            .objects
            .lock()
            .get(&(type_key(ar), key.clone()))
            .cloned())
    }

    async fn list(
        &self,
        ar: &ApiResource,
        namespace: Option<String>,
        label_selector: Option<String>,
    ) -> Result<Vec<DynamicObject>> {
        let tk = type_key(ar);
        Ok(self
            .objects
            .lock()
            .iter()
            .filter(|((t, k), _)| *t == tk && (namespace.is_none() || k.namespace == namespace))
            .filter(|(_, obj)| {
                label_selector
                    .as_deref()
                    .map_or(true, |sel| matches_selector(obj, sel))
            })
            .map(|(_, obj)| obj.clone())
            .collect())
    }

    async fn create(&self, ar: &ApiResource, obj: &DynamicObject) -> Result<DynamicObject> {
        let key = ObjectKey::of(obj)?;
        self.injected_failure(Operation::Create, ar, &key)?;
        let mut objects = self.objects.lock();
        let slot = (type_key(ar), key.clone());
        if objects.contains_key(&slot) {
            return Err(Error::conflict(&ar.kind, key.to_string()));
        }
        let mut stored = obj.clone();
        stored.metadata.uid = None;
        stored.metadata.deletion_timestamp = None;
        self.assign_server_fields(&mut stored);
        objects.insert(slot, stored.clone());
        drop(objects);
        self.record(Operation::Create, ar, &key);
        Ok(stored)
    }

    async fn update(&self, ar: &ApiResource, obj: &DynamicObject) -> Result<DynamicObject> {
        let key = ObjectKey::of(obj)?;
        self.injected_failure(Operation::Update, ar, &key)?;
        let mut objects = self.objects.lock();
        let slot = (type_key(ar), key.clone());
        let current = objects
            .get(&slot)
            .cloned()
            .ok_or_else(|| Error::not_found(&ar.kind, key.to_string()))?;
        self.check_version(ar, &key, &current, obj)?;

        let mut stored = obj.clone();
        match current.data.get("status") {
            Some(status) => {
                if let Some(map) = stored.data.as_object_mut() {
                    map.insert("status".to_string(), status.clone());
                }
            }
            None => {
                if let Some(map) = stored.data.as_object_mut() {
                    map.remove("status");
                }
            }
        }
        stored.metadata.uid = current.metadata.uid.clone();
        stored.metadata.creation_timestamp = current.metadata.creation_timestamp.clone();
        stored.metadata.deletion_timestamp = current.metadata.deletion_timestamp.clone();
        let generation = current.metadata.generation.unwrap_or(1);
        stored.metadata.generation = Some(if spec_part(&stored) != spec_part(&current) {
            generation + 1
        } else {
            generation
        });
        stored.metadata.resource_version = Some(self.next_version());

        let finalizers_empty = stored
            .metadata
            .finalizers
            .as_ref()
            .map_or(true, Vec::is_empty);
        if stored.metadata.deletion_timestamp.is_some() && finalizers_empty {
            objects.remove(&slot);
        } else {
            objects.insert(slot, stored.clone());
        }
        drop(objects);
        self.record(Operation::Update, ar, &key);
        Ok(stored)
    }

    async fn update_status(&self, ar: &ApiResource, obj: &DynamicObject) -> Result<DynamicObject> {
        let key = ObjectKey::of(obj)?;
        self.injected_failure(Operation::UpdateStatus, ar, &key)?;
        let mut objects = self.objects.lock();
        let slot = (type_key(ar), key.clone());
        let mut stored = objects
            .get(&slot)
            .cloned()
            .ok_or_else(|| Error::not_found(&ar.kind, key.to_string()))?;
        self.check_version(ar, &key, &stored, obj)?;

        if let Some(map) = stored.data.as_object_mut() {
            match obj.data.get("status") {
                Some(status) => map.insert("status".to_string(), status.clone()),
                None => map.remove("status"),
            };
        }
        stored.metadata.resource_version = Some(self.next_version());
        objects.insert(slot, stored.clone());
        drop(objects);
        self.record(Operation::UpdateStatus, ar, &key);
        Ok(stored)
    }

    async fn delete(&self, ar: &ApiResource, key: &ObjectKey) -> Result<bool> {
        self.injected_failure(Operation::Delete, ar, key)?;
        let mut objects = self.objects.lock();
        let slot = (type_key(ar), key.clone());
        let Some(current) = objects.get(&slot).cloned() else {
            return Ok(false);
        };
        let has_finalizers = current
            .metadata
            .finalizers
            .as_ref()
            .is_some_and(|f| !f.is_empty());
        if has_finalizers {
            let mut marked = current;
            marked
                .metadata
                .deletion_timestamp
                .get_or_insert_with(|| Time(chrono::Utc::now()));
            marked.metadata.resource_version = Some(self.next_version());
            objects.insert(slot, marked);
        } else {
            objects.remove(&slot);
        }
        drop(objects);
        self.record(Operation::Delete, ar, key);
        Ok(true)
    }
}
