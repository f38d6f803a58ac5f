//! GatewayClassParameters CRD
//!
//! Holds the resource templates for the Gateway and HTTPRoute families and a
//! free-form values map handed to every template as `Values`.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::schema::{InstanceType, Schema, SchemaObject};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Parameters referenced from a GatewayClass via `parametersRef`
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "gateway.tv2.dk",
    version = "v1alpha1",
    kind = "GatewayClassParameters",
    plural = "gatewayclassparameters",
    shortname = "gcp"
)]
#[serde(rename_all = "camelCase")]
pub struct GatewayClassParametersSpec {
    /// Templates materialized for every Gateway of the class
    #[serde(default)]
    pub gateway_template: ResourceTemplateSet,

    /// Templates materialized for every HTTPRoute attached to a Gateway of the class
    #[serde(default)]
    pub http_route_template: ResourceTemplateSet,

    /// Free-form values exposed to templates as `Values`
    #[serde(default)]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub values: BTreeMap<String, Value>,
}

/// A named set of resource templates
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceTemplateSet {
    /// Template name to template source
    #[serde(default)]
    pub resource_templates: BTreeMap<String, String>,
}

impl ResourceTemplateSet {
    /// Whether the set holds no templates
    pub fn is_empty(&self) -> bool {
        self.resource_templates.is_empty()
    }
}

fn preserve_unknown_fields(_: &mut schemars::gen::SchemaGenerator) -> Schema {
    let mut schema = SchemaObject {
        instance_type: Some(InstanceType::Object.into()),
        ..Default::default()
    };
    schema
        .extensions
        .insert("x-kubernetes-preserve-unknown-fields".to_string(), true.into());
    Schema::Object(schema)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::CustomResourceExt;

    #[test]
    fn parameters_deserialize_from_manifest() {
        let params: GatewayClassParameters = serde_json::from_value(serde_json::json!({
            "apiVersion": "gateway.tv2.dk/v1alpha1",
            "kind": "GatewayClassParameters",
            "metadata": {"name": "default"},
            "spec": {
                "gatewayTemplate": {
                    "resourceTemplates": {
                        "lb": "apiVersion: v1\nkind: Service\n"
                    }
                },
                "httpRouteTemplate": {"resourceTemplates": {}},
                "values": {"issuer": "letsencrypt", "replicas": 2}
            }
        }))
        .unwrap();

        assert_eq!(params.spec.gateway_template.resource_templates.len(), 1);
        assert!(params.spec.http_route_template.is_empty());
        assert_eq!(params.spec.values["replicas"], 2);
    }

    #[test]
    fn missing_sections_default_to_empty() {
        let spec: GatewayClassParametersSpec = serde_json::from_value(serde_json::json!({})).unwrap();
        assert!(spec.gateway_template.is_empty());
        assert!(spec.values.is_empty());
    }

    #[test]
    fn crd_is_cluster_scoped() {
        let crd = GatewayClassParameters::crd();
        assert_eq!(crd.spec.scope, "Cluster");
        assert_eq!(crd.spec.group, "gateway.tv2.dk");
        assert_eq!(crd.spec.names.kind, "GatewayClassParameters");
    }
}
