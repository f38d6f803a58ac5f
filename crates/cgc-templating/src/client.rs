//! Cluster access used by the engine
//!
//! [`ResourceClient`] is the seam between the engine and the API server:
//! type discovery, get, and server-side apply of untyped documents.
//! [`KubeResourceClient`] is the kube-rs implementation.

use async_trait::async_trait;
use cgc_common::Error;
use dashmap::DashMap;
use kube::api::{Api, DynamicObject, GroupVersionKind, Patch, PatchParams};
use kube::discovery::{self, Scope};
use kube::Client;
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::composite::TypeIdentity;

/// Cluster operations needed to materialize resources
#[async_trait]
pub trait ResourceClient: Send + Sync {
    /// Look up the type served for (group, version, kind).
    ///
    /// Returns `Ok(None)` when the cluster does not serve the kind.
    async fn resolve_type(
        &self,
        group: &str,
        version: &str,
        kind: &str,
    ) -> Result<Option<TypeIdentity>, Error>;

    /// Fetch a resource. Returns `Ok(None)` when it does not exist.
    async fn get(
        &self,
        ty: &TypeIdentity,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<JsonValue>, Error>;

    /// Server-side apply a document with forced field ownership
    async fn apply(
        &self,
        ty: &TypeIdentity,
        namespace: Option<&str>,
        name: &str,
        doc: &JsonValue,
        field_manager: &str,
    ) -> Result<(), Error>;
}

/// [`ResourceClient`] backed by a kube-rs client.
///
/// Discovery results are cached per (group, version, kind). Unknown kinds are
/// not cached so a CRD installed later is picked up without a restart.
pub struct KubeResourceClient {
    client: Client,
    types: DashMap<(String, String, String), TypeIdentity>,
}

impl KubeResourceClient {
    /// Create a new client
    pub fn new(client: Client) -> Self {
        Self {
            client,
            types: DashMap::new(),
        }
    }

    fn api(&self, ty: &TypeIdentity, namespace: Option<&str>) -> Api<DynamicObject> {
        let ar = ty.api_resource();
        match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &ar),
            None => Api::all_with(self.client.clone(), &ar),
        }
    }
}

#[async_trait]
impl ResourceClient for KubeResourceClient {
    async fn resolve_type(
        &self,
        group: &str,
        version: &str,
        kind: &str,
    ) -> Result<Option<TypeIdentity>, Error> {
        let key = (group.to_string(), version.to_string(), kind.to_string());
        if let Some(ty) = self.types.get(&key) {
            return Ok(Some(ty.clone()));
        }

        let gvk = GroupVersionKind::gvk(group, version, kind);
        match discovery::pinned_kind(&self.client, &gvk).await {
            Ok((ar, caps)) => {
                let ty = TypeIdentity {
                    group: ar.group,
                    version: ar.version,
                    kind: ar.kind,
                    plural: ar.plural,
                    namespaced: matches!(caps.scope, Scope::Namespaced),
                };
                debug!(kind = %ty.kind, plural = %ty.plural, namespaced = ty.namespaced, "discovered resource type");
                self.types.insert(key, ty.clone());
                Ok(Some(ty))
            }
            Err(kube::Error::Discovery(e)) => {
                debug!(group = %group, version = %version, kind = %kind, error = %e, "kind not served");
                Ok(None)
            }
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn get(
        &self,
        ty: &TypeIdentity,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<JsonValue>, Error> {
        let obj = self.api(ty, namespace).get_opt(name).await?;
        obj.map(|o| serde_json::to_value(o).map_err(Error::from))
            .transpose()
    }

    async fn apply(
        &self,
        ty: &TypeIdentity,
        namespace: Option<&str>,
        name: &str,
        doc: &JsonValue,
        field_manager: &str,
    ) -> Result<(), Error> {
        let params = PatchParams::apply(field_manager).force();
        self.api(ty, namespace)
            .patch(name, &params, &Patch::Apply(doc))
            .await?;
        Ok(())
    }
}
