//! In-memory [`ResourceClient`] for tests
//!
//! Enable the `test-utils` feature to use it from other crates.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use cgc_common::kube_utils::parse_api_version;
use cgc_common::Error;
use serde_json::Value as JsonValue;

use crate::client::ResourceClient;
use crate::composite::TypeIdentity;

type ObjectKey = (String, String, Option<String>, String);

/// Fake cluster with registrable types, injectable failures and apply tracking
#[derive(Default)]
pub struct FakeCluster {
    types: Mutex<Vec<TypeIdentity>>,
    objects: Mutex<BTreeMap<ObjectKey, JsonValue>>,
    failing_gets: Mutex<BTreeSet<String>>,
    failing_applies: Mutex<BTreeSet<String>>,
    discovery_down: AtomicBool,
    hang: AtomicBool,
    applies: AtomicUsize,
    field_managers: Mutex<BTreeSet<String>>,
}

impl FakeCluster {
    /// Empty cluster serving no types
    pub fn new() -> Self {
        Self::default()
    }

    /// Cluster serving a handful of core and cert-manager types
    pub fn with_common_types() -> Self {
        let cluster = Self::new();
        cluster.register_type("v1", "Service", "services", true);
        cluster.register_type("v1", "ConfigMap", "configmaps", true);
        cluster.register_type("v1", "Secret", "secrets", true);
        cluster.register_type("v1", "Namespace", "namespaces", false);
        cluster.register_type("cert-manager.io/v1", "Certificate", "certificates", true);
        cluster.register_type("cert-manager.io/v1", "ClusterIssuer", "clusterissuers", false);
        cluster
    }

    /// Serve a type
    pub fn register_type(&self, api_version: &str, kind: &str, plural: &str, namespaced: bool) {
        let Ok((group, version)) = parse_api_version(api_version) else {
            return;
        };
        lock(&self.types).push(TypeIdentity {
            group,
            version,
            kind: kind.to_string(),
            plural: plural.to_string(),
            namespaced,
        });
    }

    /// The registered type for an apiVersion and kind
    pub fn type_for(&self, api_version: &str, kind: &str) -> Option<TypeIdentity> {
        lock(&self.types)
            .iter()
            .find(|t| t.api_version() == api_version && t.kind == kind)
            .cloned()
    }

    /// Store an object directly, bypassing apply
    pub fn insert(&self, ty: &TypeIdentity, namespace: Option<&str>, name: &str, doc: JsonValue) {
        lock(&self.objects).insert(key(ty, namespace, name), doc);
    }

    /// Read a stored object
    pub fn object(&self, ty: &TypeIdentity, namespace: Option<&str>, name: &str) -> Option<JsonValue> {
        lock(&self.objects).get(&key(ty, namespace, name)).cloned()
    }

    /// Modify a stored object in place, e.g. to simulate another controller
    /// writing status
    pub fn update(
        &self,
        ty: &TypeIdentity,
        namespace: Option<&str>,
        name: &str,
        f: impl FnOnce(&mut JsonValue),
    ) {
        if let Some(doc) = lock(&self.objects).get_mut(&key(ty, namespace, name)) {
            f(doc);
        }
    }

    /// Number of stored objects
    pub fn object_count(&self) -> usize {
        lock(&self.objects).len()
    }

    /// Make discovery fail with a transport error
    pub fn fail_discovery(&self, fail: bool) {
        self.discovery_down.store(fail, Ordering::SeqCst);
    }

    /// Make gets of the named object fail with a transport error
    pub fn fail_get(&self, name: &str) {
        lock(&self.failing_gets).insert(name.to_string());
    }

    /// Make applies of the named object fail
    pub fn fail_apply(&self, name: &str) {
        lock(&self.failing_applies).insert(name.to_string());
    }

    /// Make every client call block until the caller gives up on it
    pub fn hang(&self, hang: bool) {
        self.hang.store(hang, Ordering::SeqCst);
    }

    /// Number of successful applies
    pub fn apply_count(&self) -> usize {
        self.applies.load(Ordering::SeqCst)
    }

    /// Field managers seen on applies
    pub fn field_managers(&self) -> Vec<String> {
        lock(&self.field_managers).iter().cloned().collect()
    }

    async fn maybe_hang(&self) {
        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn key(ty: &TypeIdentity, namespace: Option<&str>, name: &str) -> ObjectKey {
    (
        ty.api_version(),
        ty.kind.clone(),
        namespace.map(str::to_string),
        name.to_string(),
    )
}

fn unavailable(what: &str) -> Error {
    Error::internal_with_context("fake-cluster", format!("{what}: connection refused"))
}

#[async_trait]
impl ResourceClient for FakeCluster {
    async fn resolve_type(
        &self,
        group: &str,
        version: &str,
        kind: &str,
    ) -> Result<Option<TypeIdentity>, Error> {
        self.maybe_hang().await;
        if self.discovery_down.load(Ordering::SeqCst) {
            return Err(unavailable("discovery"));
        }
        Ok(lock(&self.types)
            .iter()
            .find(|t| t.group == group && t.version == version && t.kind == kind)
            .cloned())
    }

    async fn get(
        &self,
        ty: &TypeIdentity,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<JsonValue>, Error> {
        self.maybe_hang().await;
        if lock(&self.failing_gets).contains(name) {
            return Err(unavailable("get"));
        }
        Ok(self.object(ty, namespace, name))
    }

    async fn apply(
        &self,
        ty: &TypeIdentity,
        namespace: Option<&str>,
        name: &str,
        doc: &JsonValue,
        field_manager: &str,
    ) -> Result<(), Error> {
        self.maybe_hang().await;
        if lock(&self.failing_applies).contains(name) {
            return Err(unavailable("apply"));
        }

        // Apply never touches status, which belongs to whoever reconciles the object
        let mut objects = lock(&self.objects);
        let k = key(ty, namespace, name);
        let status = objects.get(&k).and_then(|o| o.get("status")).cloned();
        let mut stored = doc.clone();
        if let (Some(status), Some(obj)) = (status, stored.as_object_mut()) {
            obj.insert("status".to_string(), status);
        }
        objects.insert(k, stored);
        drop(objects);

        lock(&self.field_managers).insert(field_manager.to_string());
        self.applies.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
