//! Applier
//!
//! Server-side applies every rendered resource of a run. Namespaced resources
//! get a controller owner reference to the parent and always land in the
//! parent's namespace. Cluster-scoped resources are applied without an owner,
//! since a namespaced parent cannot own them.
//!
//! Failures are isolated per resource. Anything that did apply stays applied.

use std::sync::Arc;

use cgc_common::kube_utils::{controller_owner_ref, object_namespace, set_controller_reference};
use cgc_common::{Error, CONTROLLER_NAME};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::Resource;
use serde_json::Value as JsonValue;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::ResourceClient;
use crate::composite::{CompositeResource, MaterializationRun};
use crate::driver::or_cancel;
use crate::error::ApplyError;

/// The object materialized resources are owned by
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParentRef {
    /// apiVersion of the parent
    pub api_version: String,
    /// Kind of the parent
    pub kind: String,
    /// Name of the parent
    pub name: String,
    /// Namespace of the parent, `None` if cluster-scoped
    pub namespace: Option<String>,
    /// UID of the parent, required for owner references
    pub uid: Option<String>,
}

impl ParentRef {
    /// Reference to a typed Kubernetes object
    pub fn from_resource<K>(obj: &K) -> Self
    where
        K: Resource<DynamicType = ()>,
    {
        let meta = obj.meta();
        Self {
            api_version: K::api_version(&()).to_string(),
            kind: K::kind(&()).to_string(),
            name: meta.name.clone().unwrap_or_default(),
            namespace: meta.namespace.clone(),
            uid: meta.uid.clone(),
        }
    }

    /// Controller owner reference pointing at this parent.
    ///
    /// Only a namespaced parent with a uid can own resources.
    pub fn owner_reference(&self) -> Result<OwnerReference, Error> {
        if self.namespace.is_none() {
            return Err(Error::validation_for(
                &self.name,
                format!("cluster-scoped {} cannot own namespaced resources", self.kind),
            ));
        }
        let uid = self.uid.as_deref().ok_or_else(|| {
            Error::validation_for_field(&self.name, "metadata.uid", "parent has no uid")
        })?;
        Ok(controller_owner_ref(
            &self.api_version,
            &self.kind,
            &self.name,
            uid,
        ))
    }
}

/// Per-resource outcome of an apply
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// Templates whose resource was applied
    pub applied: Vec<String>,
    /// Templates whose resource failed to apply
    pub failed: Vec<String>,
    /// Templates skipped because they have not rendered yet
    pub pending: Vec<String>,
}

impl ApplyReport {
    /// Number of resources an apply was attempted for
    pub fn total(&self) -> usize {
        self.applied.len() + self.failed.len()
    }
}

/// Applies materialized resources with forced field ownership
#[derive(Clone)]
pub struct Applier {
    client: Arc<dyn ResourceClient>,
    field_manager: String,
}

impl Applier {
    /// Create an applier using the controller's field manager
    pub fn new(client: Arc<dyn ResourceClient>) -> Self {
        Self::with_field_manager(client, CONTROLLER_NAME)
    }

    /// Create an applier with an explicit field manager
    pub fn with_field_manager(client: Arc<dyn ResourceClient>, field_manager: impl Into<String>) -> Self {
        Self {
            client,
            field_manager: field_manager.into(),
        }
    }

    /// Apply every rendered resource of `run`.
    ///
    /// Unrendered resources are pending and skipped. A rendered resource
    /// whose type never resolved counts as a failure.
    ///
    /// # Errors
    ///
    /// [`ApplyError::Partial`] if any resource failed, after every other
    /// resource was attempted. [`ApplyError::Cancelled`] if `cancel` fires.
    pub async fn apply(
        &self,
        run: &MaterializationRun,
        parent: &ParentRef,
        cancel: &CancellationToken,
    ) -> Result<ApplyReport, ApplyError> {
        let mut report = ApplyReport::default();

        for resource in run.resources() {
            let template = resource.template().to_string();
            let Some(doc) = resource.rendered() else {
                debug!(template = %template, "skipping unrendered resource");
                report.pending.push(template);
                continue;
            };
            if cancel.is_cancelled() {
                return Err(ApplyError::Cancelled);
            }

            let Some(result) = or_cancel(cancel, self.apply_one(resource, doc, parent)).await else {
                return Err(ApplyError::Cancelled);
            };
            match result {
                Ok(()) => report.applied.push(template),
                Err(e) => {
                    warn!(template = %template, parent = %parent.name, error = %e, "failed to apply resource");
                    report.failed.push(template);
                }
            }
        }

        if !report.failed.is_empty() {
            return Err(ApplyError::Partial {
                failed: report.failed.len(),
                total: report.total(),
            });
        }

        info!(
            parent = %parent.name,
            kind = %parent.kind,
            applied = report.applied.len(),
            pending = report.pending.len(),
            "applied materialized resources"
        );
        Ok(report)
    }

    async fn apply_one(
        &self,
        resource: &CompositeResource,
        doc: &JsonValue,
        parent: &ParentRef,
    ) -> Result<(), Error> {
        let template = resource.template();
        let ty = resource
            .type_identity()
            .ok_or_else(|| Error::validation_for(template, "resource type is not resolved"))?;
        let name = resource.resource_name().ok_or_else(|| {
            Error::validation_for_field(template, "metadata.name", "rendered resource has no name")
        })?;

        let mut doc = doc.clone();
        let namespace = if ty.namespaced {
            let owner = parent.owner_reference()?;
            let parent_ns = parent.namespace.as_deref().unwrap_or_default();
            set_controller_reference(&mut doc, &owner)?;
            scope_to_namespace(&mut doc, parent_ns)?;
            Some(parent_ns)
        } else {
            None
        };

        self.client
            .apply(ty, namespace, name, &doc, &self.field_manager)
            .await?;
        debug!(template = %template, kind = %ty.kind, name = %name, "applied resource");
        Ok(())
    }
}

/// Place a namespaced document in `namespace`, rejecting any other namespace
fn scope_to_namespace(doc: &mut JsonValue, namespace: &str) -> Result<(), Error> {
    if let Some(ns) = object_namespace(doc) {
        if ns != namespace {
            return Err(Error::validation_for_field(
                ns,
                "metadata.namespace",
                format!("resources must be created in the parent namespace {namespace:?}"),
            ));
        }
        return Ok(());
    }
    if let Some(meta) = doc.get_mut("metadata").and_then(JsonValue::as_object_mut) {
        meta.insert("namespace".to_string(), JsonValue::String(namespace.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use serde_json::json;

    use super::*;
    use crate::compiler::TemplateCompiler;
    use crate::driver::Materializer;
    use crate::testing::FakeCluster;
    use crate::values::TemplateValues;

    fn gateway_parent() -> ParentRef {
        ParentRef {
            api_version: "gateway.networking.k8s.io/v1beta1".to_string(),
            kind: "Gateway".to_string(),
            name: "gw".to_string(),
            namespace: Some("edge".to_string()),
            uid: Some("gw-uid".to_string()),
        }
    }

    fn doc(api_version: &str, kind: &str, name: &str) -> String {
        format!("apiVersion: {api_version}\nkind: {kind}\nmetadata:\n  name: {name}\n")
    }

    async fn materialize(cluster: &Arc<FakeCluster>, entries: &[(&str, String)]) -> MaterializationRun {
        let templates: BTreeMap<String, String> = entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        let set = TemplateCompiler::default().compile(&templates).unwrap();
        let values = TemplateValues::builder()
            .gateway(&json!({"metadata": {"name": "gw"}}))
            .build()
            .unwrap();
        Materializer::new(cluster.clone())
            .run_pass(
                &MaterializationRun::new(Arc::new(set)),
                &values,
                "edge",
                true,
                &CancellationToken::new(),
            )
            .await
            .run
    }

    #[tokio::test]
    async fn namespaced_resource_is_owned_and_scoped() {
        let cluster = Arc::new(FakeCluster::with_common_types());
        let run = materialize(&cluster, &[("svc", doc("v1", "Service", "lb"))]).await;

        let report = Applier::new(cluster.clone())
            .apply(&run, &gateway_parent(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.applied, vec!["svc"]);

        let ty = cluster.type_for("v1", "Service").unwrap();
        let stored = cluster.object(&ty, Some("edge"), "lb").unwrap();
        assert_eq!(stored["metadata"]["namespace"], "edge");
        let owner = &stored["metadata"]["ownerReferences"][0];
        assert_eq!(owner["uid"], "gw-uid");
        assert_eq!(owner["kind"], "Gateway");
        assert_eq!(owner["controller"], true);
        assert_eq!(cluster.field_managers(), vec![CONTROLLER_NAME.to_string()]);
    }

    #[tokio::test]
    async fn cluster_scoped_resource_has_no_owner() {
        let cluster = Arc::new(FakeCluster::with_common_types());
        let run = materialize(
            &cluster,
            &[("issuer", doc("cert-manager.io/v1", "ClusterIssuer", "le"))],
        )
        .await;

        Applier::new(cluster.clone())
            .apply(&run, &gateway_parent(), &CancellationToken::new())
            .await
            .unwrap();

        let ty = cluster.type_for("cert-manager.io/v1", "ClusterIssuer").unwrap();
        let stored = cluster.object(&ty, None, "le").unwrap();
        assert!(stored["metadata"].get("ownerReferences").is_none());
    }

    #[tokio::test]
    async fn cluster_scoped_parent_cannot_own_namespaced_resource() {
        let cluster = Arc::new(FakeCluster::with_common_types());
        let run = materialize(&cluster, &[("svc", doc("v1", "Service", "lb"))]).await;
        let parent = ParentRef {
            namespace: None,
            ..gateway_parent()
        };

        let err = Applier::new(cluster.clone())
            .apply(&run, &parent, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ApplyError::Partial { failed: 1, total: 1 }));
        assert_eq!(cluster.object_count(), 0);
    }

    #[tokio::test]
    async fn one_of_three_failing_keeps_the_others() {
        let cluster = Arc::new(FakeCluster::with_common_types());
        cluster.fail_apply("b");
        let run = materialize(
            &cluster,
            &[
                ("a", doc("v1", "ConfigMap", "a")),
                ("b", doc("v1", "ConfigMap", "b")),
                ("c", doc("v1", "ConfigMap", "c")),
            ],
        )
        .await;

        let err = Applier::new(cluster.clone())
            .apply(&run, &gateway_parent(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "1 of 3 resources failed to apply");

        let ty = cluster.type_for("v1", "ConfigMap").unwrap();
        assert!(cluster.object(&ty, Some("edge"), "a").is_some());
        assert!(cluster.object(&ty, Some("edge"), "c").is_some());
        assert!(cluster.object(&ty, Some("edge"), "b").is_none());
    }

    #[tokio::test]
    async fn unknown_kind_counts_as_one_failure() {
        let cluster = Arc::new(FakeCluster::with_common_types());
        let run = materialize(
            &cluster,
            &[
                ("svc", doc("v1", "Service", "lb")),
                ("widget", doc("x.y.z/v1", "Widget", "w")),
            ],
        )
        .await;

        let err = Applier::new(cluster.clone())
            .apply(&run, &gateway_parent(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ApplyError::Partial { failed: 1, total: 2 }));
        assert_eq!(cluster.apply_count(), 1);
    }

    #[tokio::test]
    async fn unrendered_resources_are_pending() {
        let cluster = Arc::new(FakeCluster::with_common_types());
        let run = materialize(
            &cluster,
            &[
                ("svc", doc("v1", "Service", "lb")),
                (
                    "cert",
                    "kind: Certificate\nip: {{ Resources.svc.status }}\n".to_string(),
                ),
            ],
        )
        .await;

        let report = Applier::new(cluster.clone())
            .apply(&run, &gateway_parent(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.pending, vec!["cert"]);
        assert_eq!(report.applied, vec!["svc"]);
    }

    #[tokio::test]
    async fn applying_twice_is_idempotent() {
        let cluster = Arc::new(FakeCluster::with_common_types());
        let run = materialize(&cluster, &[("svc", doc("v1", "Service", "lb"))]).await;
        let applier = Applier::new(cluster.clone());
        let ty = cluster.type_for("v1", "Service").unwrap();

        applier
            .apply(&run, &gateway_parent(), &CancellationToken::new())
            .await
            .unwrap();
        let first = cluster.object(&ty, Some("edge"), "lb");
        applier
            .apply(&run, &gateway_parent(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(cluster.object(&ty, Some("edge"), "lb"), first);
        assert_eq!(cluster.object_count(), 1);
    }

    #[tokio::test]
    async fn foreign_namespace_is_rejected() {
        let cluster = Arc::new(FakeCluster::with_common_types());
        let run = materialize(
            &cluster,
            &[(
                "svc",
                "apiVersion: v1\nkind: Service\nmetadata:\n  name: lb\n  namespace: other\n".to_string(),
            )],
        )
        .await;

        let err = Applier::new(cluster.clone())
            .apply(&run, &gateway_parent(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ApplyError::Partial { failed: 1, total: 1 }));
    }

    #[tokio::test]
    async fn cancelled_apply_stops() {
        let cluster = Arc::new(FakeCluster::with_common_types());
        let run = materialize(&cluster, &[("svc", doc("v1", "Service", "lb"))]).await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = Applier::new(cluster.clone())
            .apply(&run, &gateway_parent(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ApplyError::Cancelled));
        assert_eq!(cluster.apply_count(), 0);
    }

    #[test]
    fn parent_ref_from_typed_resource() {
        use cgc_common::crd::{Gateway, GatewaySpec};

        let mut gw = Gateway::new(
            "gw",
            GatewaySpec {
                gateway_class_name: "cloud".to_string(),
                listeners: vec![],
                extra: BTreeMap::new(),
            },
        );
        gw.metadata.namespace = Some("edge".to_string());
        gw.metadata.uid = Some("abc".to_string());

        let parent = ParentRef::from_resource(&gw);
        assert_eq!(parent.api_version, "gateway.networking.k8s.io/v1beta1");
        assert_eq!(parent.kind, "Gateway");
        assert_eq!(parent.owner_reference().unwrap().uid, "abc");
    }
}
