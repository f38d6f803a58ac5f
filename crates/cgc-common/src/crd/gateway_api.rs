//! Gateway API resources watched by the controller
//!
//! Only the fields the controller reads are typed. Everything else in a spec
//! is kept in a flattened `extra` map so that projecting a Gateway or
//! HTTPRoute into template values is lossless.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::types::Condition;
use crate::GATEWAY_API_GROUP;

// =============================================================================
// GatewayClass
// =============================================================================

/// GatewayClass spec
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "gateway.networking.k8s.io",
    version = "v1beta1",
    kind = "GatewayClass",
    plural = "gatewayclasses",
    status = "GatewayClassStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct GatewayClassSpec {
    /// Controller responsible for Gateways of this class
    pub controller_name: String,

    /// Reference to the class parameters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters_ref: Option<ParametersReference>,

    /// Free-form description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Reference from a GatewayClass to its parameters object
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ParametersReference {
    /// API group of the referent
    pub group: String,
    /// Kind of the referent
    pub kind: String,
    /// Name of the referent
    pub name: String,
    /// Namespace of the referent, for namespaced parameter kinds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// GatewayClass status
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GatewayClassStatus {
    /// Current conditions
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

// =============================================================================
// Gateway
// =============================================================================

/// Gateway spec
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "gateway.networking.k8s.io",
    version = "v1beta1",
    kind = "Gateway",
    plural = "gateways",
    namespaced,
    status = "GatewayStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct GatewaySpec {
    /// GatewayClass this Gateway belongs to
    pub gateway_class_name: String,

    /// Listener configurations
    #[serde(default)]
    pub listeners: Vec<Listener>,

    /// Remaining spec fields, kept verbatim
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Gateway listener
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Listener {
    /// Listener name
    pub name: String,
    /// Optional hostname filter, may be a wildcard (`*.example.com`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    /// Port number
    pub port: i32,
    /// Protocol (HTTP, HTTPS, TLS, TCP, UDP)
    pub protocol: String,
    /// Remaining listener fields (tls, allowedRoutes), kept verbatim
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Gateway status
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GatewayStatus {
    /// Current conditions
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Fields written by other controllers (addresses, listeners)
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Gateway {
    /// Hostnames of all listeners that set one
    pub fn listener_hostnames(&self) -> impl Iterator<Item = &str> {
        self.spec
            .listeners
            .iter()
            .filter_map(|l| l.hostname.as_deref())
    }
}

// =============================================================================
// HTTPRoute
// =============================================================================

/// HTTPRoute spec
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "gateway.networking.k8s.io",
    version = "v1beta1",
    kind = "HTTPRoute",
    plural = "httproutes",
    namespaced,
    status = "HTTPRouteStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct HTTPRouteSpec {
    /// Gateways this route attaches to
    #[serde(default)]
    pub parent_refs: Vec<ParentReference>,

    /// Hostnames matched by this route
    #[serde(default)]
    pub hostnames: Vec<String>,

    /// Remaining spec fields (rules), kept verbatim
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Reference from a route to a parent Gateway
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ParentReference {
    /// API group of the parent (defaults to the Gateway API group)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    /// Kind of the parent (defaults to Gateway)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Namespace of the parent (defaults to the route's namespace)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Name of the parent
    pub name: String,
    /// Listener name within the parent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_name: Option<String>,
    /// Listener port within the parent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,
}

impl ParentReference {
    /// Whether this reference points at a Gateway (the default kind)
    pub fn is_gateway(&self) -> bool {
        self.group.as_deref().unwrap_or(GATEWAY_API_GROUP) == GATEWAY_API_GROUP
            && self.kind.as_deref().unwrap_or("Gateway") == "Gateway"
    }

    /// Namespace of the parent, defaulting to the route's own namespace
    pub fn namespace_or<'a>(&'a self, route_namespace: &'a str) -> &'a str {
        self.namespace.as_deref().unwrap_or(route_namespace)
    }
}

/// HTTPRoute status
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HTTPRouteStatus {
    /// Per-parent status
    #[serde(default)]
    pub parents: Vec<RouteParentStatus>,
}

/// Status of a route with respect to one parent
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RouteParentStatus {
    /// The parent this status is for
    pub parent_ref: ParentReference,
    /// Controller that wrote this status
    pub controller_name: String,
    /// Conditions for this parent
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl HTTPRoute {
    /// Whether the route attaches to the given Gateway
    pub fn attaches_to(&self, gateway_namespace: &str, gateway_name: &str) -> bool {
        let route_ns = self.metadata.namespace.as_deref().unwrap_or_default();
        self.spec.parent_refs.iter().any(|p| {
            p.is_gateway() && p.name == gateway_name && p.namespace_or(route_ns) == gateway_namespace
        })
    }
}
