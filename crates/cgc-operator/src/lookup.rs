//! Dependency lookups
//!
//! Finds the GatewayClass, GatewayClassParameters and parent Gateway an
//! object depends on, and writes status back. All API access goes through the
//! [`GatewayApi`] trait so reconcilers can be tested against mocks.

use async_trait::async_trait;
use cgc_common::crd::{
    Gateway, GatewayClass, GatewayClassParameters, GatewayClassStatus, GatewayStatus, HTTPRoute,
    HTTPRouteStatus, ParentReference,
};
use cgc_common::{Error, PARAMETERS_GROUP, PARAMETERS_KIND};
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::{Client, ResourceExt};
use serde_json::json;

#[cfg(test)]
use mockall::automock;

use crate::error::ReconcileError;

/// Gateway API access needed by the reconcilers
#[cfg_attr(test, automock)]
#[async_trait]
pub trait GatewayApi: Send + Sync {
    /// Get a GatewayClass by name
    async fn get_gateway_class(&self, name: &str) -> Result<Option<GatewayClass>, Error>;

    /// Get a (cluster-scoped) GatewayClassParameters by name
    async fn get_parameters(&self, name: &str) -> Result<Option<GatewayClassParameters>, Error>;

    /// Get a Gateway
    async fn get_gateway(&self, namespace: &str, name: &str) -> Result<Option<Gateway>, Error>;

    /// List HTTPRoutes in all namespaces
    async fn list_http_routes(&self) -> Result<Vec<HTTPRoute>, Error>;

    /// Replace the status of a GatewayClass
    async fn patch_gateway_class_status(
        &self,
        name: &str,
        status: &GatewayClassStatus,
    ) -> Result<(), Error>;

    /// Replace the status of a Gateway
    async fn patch_gateway_status(
        &self,
        namespace: &str,
        name: &str,
        status: &GatewayStatus,
    ) -> Result<(), Error>;

    /// Replace the status of an HTTPRoute
    async fn patch_http_route_status(
        &self,
        namespace: &str,
        name: &str,
        status: &HTTPRouteStatus,
    ) -> Result<(), Error>;
}

/// [`GatewayApi`] backed by a kube-rs client
pub struct KubeGatewayApi {
    client: Client,
}

impl KubeGatewayApi {
    /// Create a new instance
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl GatewayApi for KubeGatewayApi {
    async fn get_gateway_class(&self, name: &str) -> Result<Option<GatewayClass>, Error> {
        let api: Api<GatewayClass> = Api::all(self.client.clone());
        Ok(api.get_opt(name).await?)
    }

    async fn get_parameters(&self, name: &str) -> Result<Option<GatewayClassParameters>, Error> {
        let api: Api<GatewayClassParameters> = Api::all(self.client.clone());
        Ok(api.get_opt(name).await?)
    }

    async fn get_gateway(&self, namespace: &str, name: &str) -> Result<Option<Gateway>, Error> {
        let api: Api<Gateway> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn list_http_routes(&self) -> Result<Vec<HTTPRoute>, Error> {
        let api: Api<HTTPRoute> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn patch_gateway_class_status(
        &self,
        name: &str,
        status: &GatewayClassStatus,
    ) -> Result<(), Error> {
        let api: Api<GatewayClass> = Api::all(self.client.clone());
        api.patch_status(
            name,
            &PatchParams::default(),
            &Patch::Merge(&json!({ "status": status })),
        )
        .await?;
        Ok(())
    }

    async fn patch_gateway_status(
        &self,
        namespace: &str,
        name: &str,
        status: &GatewayStatus,
    ) -> Result<(), Error> {
        let api: Api<Gateway> = Api::namespaced(self.client.clone(), namespace);
        api.patch_status(
            name,
            &PatchParams::default(),
            &Patch::Merge(&json!({ "status": status })),
        )
        .await?;
        Ok(())
    }

    async fn patch_http_route_status(
        &self,
        namespace: &str,
        name: &str,
        status: &HTTPRouteStatus,
    ) -> Result<(), Error> {
        let api: Api<HTTPRoute> = Api::namespaced(self.client.clone(), namespace);
        api.patch_status(
            name,
            &PatchParams::default(),
            &Patch::Merge(&json!({ "status": status })),
        )
        .await?;
        Ok(())
    }
}

/// Whether this controller owns the class
pub fn is_our_gateway_class(gwc: &GatewayClass, controller_name: &str) -> bool {
    gwc.spec.controller_name == controller_name
}

/// Look up a GatewayClass, treating absence as a missing dependency
pub async fn lookup_gateway_class(
    api: &dyn GatewayApi,
    name: &str,
) -> Result<GatewayClass, ReconcileError> {
    api.get_gateway_class(name)
        .await?
        .ok_or_else(|| ReconcileError::MissingDependency {
            kind: "GatewayClass",
            name: name.to_string(),
        })
}

/// Look up the parameters a GatewayClass references
pub async fn lookup_parameters(
    api: &dyn GatewayApi,
    gwc: &GatewayClass,
) -> Result<GatewayClassParameters, ReconcileError> {
    let class = gwc.name_any();
    let missing = |reason: String| ReconcileError::MissingParameters {
        class: class.clone(),
        reason,
    };

    let params_ref = gwc
        .spec
        .parameters_ref
        .as_ref()
        .ok_or_else(|| missing("no parametersRef".to_string()))?;
    if params_ref.group != PARAMETERS_GROUP || params_ref.kind != PARAMETERS_KIND {
        return Err(missing(format!(
            "parametersRef must reference {PARAMETERS_GROUP}/{PARAMETERS_KIND}, got {}/{}",
            params_ref.group, params_ref.kind
        )));
    }

    api.get_parameters(&params_ref.name)
        .await?
        .ok_or_else(|| missing(format!("{} {} not found", PARAMETERS_KIND, params_ref.name)))
}

/// Look up the Gateway a route parentRef points at.
///
/// The parentRef namespace defaults to the route's own namespace.
pub async fn lookup_parent_gateway(
    api: &dyn GatewayApi,
    route: &HTTPRoute,
    parent: &ParentReference,
) -> Result<Gateway, ReconcileError> {
    let route_ns = route
        .namespace()
        .ok_or_else(|| ReconcileError::MissingNamespace {
            kind: "HTTPRoute",
            name: route.name_any(),
        })?;
    let namespace = parent.namespace_or(&route_ns);

    api.get_gateway(namespace, &parent.name)
        .await?
        .ok_or_else(|| ReconcileError::MissingDependency {
            kind: "Gateway",
            name: format!("{}/{}", namespace, parent.name),
        })
}

/// HTTPRoutes attached to a Gateway
pub async fn attached_routes(
    api: &dyn GatewayApi,
    gateway: &Gateway,
) -> Result<Vec<HTTPRoute>, ReconcileError> {
    let namespace = gateway.namespace().unwrap_or_default();
    let name = gateway.name_any();
    Ok(api
        .list_http_routes()
        .await?
        .into_iter()
        .filter(|r| r.attaches_to(&namespace, &name))
        .collect())
}
