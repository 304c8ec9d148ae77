//! Cluster object store abstraction
//!
//! Every convergence step reads and writes the cluster through [`Store`], a
//! typed facade over the object-safe [`ObjectStore`] trait. [`KubeStore`]
//! backs it with the API server; tests use the in-memory store from
//! `crate::testing`.
//!
//! Writes use optimistic concurrency: an update carries the resourceVersion
//! it was read at and a stale write fails with [`Error::Conflict`]. Callers
//! never retry conflicts themselves; the whole reconcile is requeued.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use kube::api::{Api, ApiResource, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams};
use kube::{Client, Resource, ResourceExt};
#[cfg(any(test, feature = "testing"))]
use mockall::automock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::{Error, Result};

/// Namespace and name of an object; `namespace` is `None` for cluster-scoped kinds
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    /// Namespace, if namespaced
    pub namespace: Option<String>,
    /// Object name
    pub name: String,
}

impl ObjectKey {
    /// Key of a namespaced object
    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }

    /// Key of a cluster-scoped object
    pub fn cluster(name: impl Into<String>) -> Self {
        Self {
            namespace: None,
            name: name.into(),
        }
    }

    /// Key of an existing object; fails when it has no name
    pub fn of<K: Resource>(obj: &K) -> Result<Self> {
        let name = obj
            .meta()
            .name
            .clone()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| Error::internal_with_context("store", "object has no name"))?;
        Ok(Self {
            namespace: obj.meta().namespace.clone(),
            name,
        })
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}", ns, self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// Untyped cluster object storage
#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch an object; `None` if it does not exist
    async fn get(&self, ar: &ApiResource, key: &ObjectKey) -> Result<Option<DynamicObject>>;

    /// List objects, optionally restricted to a namespace and a label selector
    async fn list(
        &self,
        ar: &ApiResource,
        namespace: Option<String>,
        label_selector: Option<String>,
    ) -> Result<Vec<DynamicObject>>;

    /// Create a new object
    async fn create(&self, ar: &ApiResource, obj: &DynamicObject) -> Result<DynamicObject>;

    /// Replace an existing object, guarded by its resourceVersion
    async fn update(&self, ar: &ApiResource, obj: &DynamicObject) -> Result<DynamicObject>;

    /// Replace only the status of an existing object, guarded by its resourceVersion
    async fn update_status(&self, ar: &ApiResource, obj: &DynamicObject) -> Result<DynamicObject>;

    /// Delete an object; `false` if it was already gone
    async fn delete(&self, ar: &ApiResource, key: &ObjectKey) -> Result<bool>;
}

/// [`ObjectStore`] backed by the Kubernetes API server
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    /// Create a store using the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, ar: &ApiResource, namespace: Option<&str>) -> Api<DynamicObject> {
        match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, ar),
            None => Api::all_with(self.client.clone(), ar),
        }
    }
}

fn write_error(e: kube::Error, ar: &ApiResource, key: &ObjectKey) -> Error {
    match e {
        kube::Error::Api(ae) if ae.code == 409 => Error::conflict(&ar.kind, key.to_string()),
        kube::Error::Api(ae) if ae.code == 404 => Error::not_found(&ar.kind, key.to_string()),
        e => Error::from(e),
    }
}

fn key_of(obj: &DynamicObject) -> Result<ObjectKey> {
    ObjectKey::of(obj)
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn get(&self, ar: &ApiResource, key: &ObjectKey) -> Result<Option<DynamicObject>> {
        Ok(self
            .api(ar, key.namespace.as_deref())
            .get_opt(&key.name)
            .await?)
    }

    async fn list(
        &self,
        ar: &ApiResource,
        namespace: Option<String>,
        label_selector: Option<String>,
    ) -> Result<Vec<DynamicObject>> {
        let mut params = ListParams::default();
        if let Some(selector) = label_selector.as_deref() {
            params = params.labels(selector);
        }
        let list = self.api(ar, namespace.as_deref()).list(&params).await?;
        Ok(list.items)
    }

    async fn create(&self, ar: &ApiResource, obj: &DynamicObject) -> Result<DynamicObject> {
        let key = key_of(obj)?;
        debug!(kind = %ar.kind, key = %key, "creating object");
        self.api(ar, key.namespace.as_deref())
            .create(&PostParams::default(), obj)
            .await
            .map_err(|e| write_error(e, ar, &key))
    }

    async fn update(&self, ar: &ApiResource, obj: &DynamicObject) -> Result<DynamicObject> {
        let key = key_of(obj)?;
        debug!(kind = %ar.kind, key = %key, "updating object");
        self.api(ar, key.namespace.as_deref())
            .replace(&key.name, &PostParams::default(), obj)
            .await
            .map_err(|e| write_error(e, ar, &key))
    }

    async fn update_status(&self, ar: &ApiResource, obj: &DynamicObject) -> Result<DynamicObject> {
        let key = key_of(obj)?;
        // resourceVersion in a merge patch makes the API server reject stale writes
        let patch = serde_json::json!({
            "metadata": { "resourceVersion": obj.metadata.resource_version },
            "status": obj.data.get("status").cloned().unwrap_or(serde_json::Value::Null),
        });
        self.api(ar, key.namespace.as_deref())
            .patch_status(&key.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| write_error(e, ar, &key))
    }

    async fn delete(&self, ar: &ApiResource, key: &ObjectKey) -> Result<bool> {
        match self
            .api(ar, key.namespace.as_deref())
            .delete(&key.name, &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(false),
            Err(e) => Err(write_error(e, ar, key)),
        }
    }
}

/// Kinds the typed [`Store`] can handle
pub trait Managed:
    Resource<DynamicType = ()> + Clone + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

impl<K> Managed for K where
    K: Resource<DynamicType = ()> + Clone + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

/// Convert a typed object into its dynamic form
pub fn to_dynamic<K: Managed>(obj: &K) -> Result<DynamicObject> {
    let mut value = serde_json::to_value(obj)
        .map_err(|e| Error::serialization_for_kind(K::kind(&()), e.to_string()))?;
    // Every write carries type metadata, even for types that omit it
    if let Some(map) = value.as_object_mut() {
        map.insert("apiVersion".to_string(), K::api_version(&()).into());
        map.insert("kind".to_string(), K::kind(&()).into());
    }
    serde_json::from_value(value).map_err(|e| Error::serialization_for_kind(K::kind(&()), e.to_string()))
}

/// Convert a dynamic object back into its typed form
pub fn from_dynamic<K: Managed>(obj: DynamicObject) -> Result<K> {
    let value = serde_json::to_value(&obj)
        .map_err(|e| Error::serialization_for_kind(K::kind(&()), e.to_string()))?;
    serde_json::from_value(value).map_err(|e| Error::serialization_for_kind(K::kind(&()), e.to_string()))
}

/// Typed facade over an [`ObjectStore`]
#[derive(Clone)]
pub struct Store {
    inner: Arc<dyn ObjectStore>,
}

impl Store {
    /// Wrap an object store
    pub fn new(inner: Arc<dyn ObjectStore>) -> Self {
        Self { inner }
    }

    /// Store backed by the Kubernetes API server
    pub fn kube(client: Client) -> Self {
        Self::new(Arc::new(KubeStore::new(client)))
    }

    /// Fetch an object; `None` if it does not exist
    pub async fn get<K: Managed>(&self, key: &ObjectKey) -> Result<Option<K>> {
        let ar = ApiResource::erase::<K>(&());
        self.inner.get(&ar, key).await?.map(from_dynamic).transpose()
    }

    /// Fetch an object that must exist
    pub async fn require<K: Managed>(&self, key: &ObjectKey) -> Result<K> {
        self.get::<K>(key)
            .await?
            .ok_or_else(|| Error::not_found(K::kind(&()), key.to_string()))
    }

    /// List objects of a kind
    pub async fn list<K: Managed>(
        &self,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<K>> {
        let ar = ApiResource::erase::<K>(&());
        self.inner
            .list(
                &ar,
                namespace.map(str::to_string),
                label_selector.map(str::to_string),
            )
            .await?
            .into_iter()
            .map(from_dynamic)
            .collect()
    }

    /// Create a new object
    pub async fn create<K: Managed>(&self, obj: &K) -> Result<K> {
        let ar = ApiResource::erase::<K>(&());
        from_dynamic(self.inner.create(&ar, &to_dynamic(obj)?).await?)
    }

    /// Replace an existing object
    pub async fn update<K: Managed>(&self, obj: &K) -> Result<K> {
        let ar = ApiResource::erase::<K>(&());
        from_dynamic(self.inner.update(&ar, &to_dynamic(obj)?).await?)
    }

    /// Replace the status of an existing object
    pub async fn update_status<K: Managed>(&self, obj: &K) -> Result<K> {
        let ar = ApiResource::erase::<K>(&());
        from_dynamic(self.inner.update_status(&ar, &to_dynamic(obj)?).await?)
    }

    /// Delete an object; `false` if it was already gone
    pub async fn delete<K: Managed>(&self, key: &ObjectKey) -> Result<bool> {
        let ar = ApiResource::erase::<K>(&());
        self.inner.delete(&ar, key).await
    }
}

/// Outcome of [`create_or_update`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperationResult {
    /// The object did not exist and was created
    Created,
    /// The object existed and the mutation changed it
    Updated,
    /// The object existed and the mutation was a no-op
    Unchanged,
}

impl fmt::Display for OperationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Updated => write!(f, "updated"),
            Self::Unchanged => write!(f, "unchanged"),
        }
    }
}

/// True if the object has not been persisted yet (no server-assigned uid)
pub fn is_new<K: Resource>(obj: &K) -> bool {
    obj.meta().uid.as_deref().map_or(true, str::is_empty)
}

/// Fetch-or-create `obj` by its key, apply `mutate`, and persist.
///
/// `mutate` runs on `obj` itself when nothing exists yet and on the fetched
/// object otherwise, so it must handle both; use [`is_new`] to tell them
/// apart. Existing objects are only written when the mutation changed them.
pub async fn create_or_update<K, F>(
    store: &Store,
    obj: K,
    mutate: F,
) -> Result<(K, OperationResult)>
where
    K: Managed,
    F: FnOnce(&mut K) -> Result<()>,
{
    let key = ObjectKey::of(&obj)?;
    match store.get::<K>(&key).await? {
        None => {
            let mut obj = obj;
            mutate(&mut obj)?;
            let created = store.create(&obj).await?;
            debug!(kind = %K::kind(&()), key = %key, "created");
            Ok((created, OperationResult::Created))
        }
        Some(mut existing) => {
            let before = serde_json::to_value(&existing)?;
            mutate(&mut existing)?;
            if serde_json::to_value(&existing)? == before {
                return Ok((existing, OperationResult::Unchanged));
            }
            let updated = store.update(&existing).await?;
            debug!(kind = %K::kind(&()), key = %key, "updated");
            Ok((updated, OperationResult::Updated))
        }
    }
}

/// Delete an object, treating absence as success
pub async fn delete_ignore_missing<K: Managed>(store: &Store, key: &ObjectKey) -> Result<bool> {
    let deleted = store.delete::<K>(key).await?;
    if !deleted {
        debug!(kind = %K::kind(&()), key = %key, "already absent");
    }
    Ok(deleted)
}

/// Name of a resource for logging
pub fn display_name<K: Resource>(obj: &K) -> String {
    match obj.meta().namespace.as_deref() {
        Some(ns) => format!("{}/{}", ns, obj.name_any()),
        None => obj.name_any(),
    }
}
