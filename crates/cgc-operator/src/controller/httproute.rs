//! HTTPRoute reconciler
//!
//! Materializes the class's HTTPRoute template family with the route as
//! parent. The Gateway of the route's first Gateway parentRef decides the
//! class, and the route is reported accepted on every parent owned by this
//! controller.

use std::sync::Arc;

use cgc_common::crd::{
    set_condition, Condition, ConditionStatus, Gateway, GatewayClassParameters, HTTPRoute,
    HTTPRouteStatus, ParentReference, RouteParentStatus,
};
use cgc_templating::{collect_hostnames, MaterializeError, ParentRef, TemplateValues};
use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::{debug, error, info, instrument, warn};

use super::{accepted, Context, REASON_ACCEPTED, REASON_INVALID_PARAMETERS, REASON_PENDING};
use crate::error::ReconcileError;
use crate::lookup::{
    is_our_gateway_class, lookup_gateway_class, lookup_parameters, lookup_parent_gateway,
};

/// Reconcile an HTTPRoute
#[instrument(
    skip(route, ctx),
    fields(route = %route.name_any(), namespace = %route.namespace().unwrap_or_default())
)]
pub async fn reconcile(route: Arc<HTTPRoute>, ctx: Arc<Context>) -> Result<Action, ReconcileError> {
    let namespace = route
        .namespace()
        .ok_or_else(|| ReconcileError::MissingNamespace {
            kind: "HTTPRoute",
            name: route.name_any(),
        })?;

    let Some(parent) = route.spec.parent_refs.iter().find(|p| p.is_gateway()) else {
        debug!("route has no gateway parent");
        return Ok(Action::await_change());
    };

    let gateway = match lookup_parent_gateway(ctx.api.as_ref(), &route, parent).await {
        Ok(gw) => gw,
        Err(e) if e.is_dependency_missing() => {
            debug!(error = %e, "waiting for parent gateway");
            return Ok(Action::requeue(ctx.config.requeue()));
        }
        Err(e) => return Err(e),
    };

    let gwc = match lookup_gateway_class(ctx.api.as_ref(), &gateway.spec.gateway_class_name).await
    {
        Ok(gwc) => gwc,
        Err(e) if e.is_dependency_missing() => {
            debug!(error = %e, "waiting for gateway class");
            return Ok(Action::requeue(ctx.config.requeue()));
        }
        Err(e) => return Err(e),
    };
    if !is_our_gateway_class(&gwc, &ctx.config.controller_name) {
        return Ok(Action::await_change());
    }

    let generation = route.metadata.generation;
    let (condition, result) = match lookup_parameters(ctx.api.as_ref(), &gwc).await {
        Ok(params) => match materialize(&ctx, &route, &gateway, &params, &namespace).await {
            Ok(pending) if pending.is_empty() => (
                accepted(ConditionStatus::True, REASON_ACCEPTED, "route accepted", generation),
                Ok(Action::await_change()),
            ),
            Ok(pending) => (
                accepted(
                    ConditionStatus::False,
                    REASON_PENDING,
                    format!("waiting for templates: {}", pending.join(", ")),
                    generation,
                ),
                Ok(Action::requeue(ctx.config.requeue())),
            ),
            Err(e) if e.is_cancelled() => return Err(e),
            Err(
                e @ (ReconcileError::Template(_)
                | ReconcileError::Materialize(MaterializeError::Template(_))),
            ) => (
                accepted(
                    ConditionStatus::False,
                    REASON_INVALID_PARAMETERS,
                    e.to_string(),
                    generation,
                ),
                Err(e),
            ),
            Err(e) => (
                accepted(ConditionStatus::False, REASON_PENDING, e.to_string(), generation),
                Err(e),
            ),
        },
        Err(e) if e.is_dependency_missing() => {
            warn!(error = %e, "gateway class parameters unavailable");
            (
                accepted(
                    ConditionStatus::False,
                    REASON_INVALID_PARAMETERS,
                    e.to_string(),
                    generation,
                ),
                Ok(Action::requeue(ctx.config.requeue())),
            )
        }
        Err(e) => return Err(e),
    };

    let parents = our_parents(&ctx, &route, &namespace).await?;
    let status = route_status(&route, &ctx.config.controller_name, &parents, condition);
    ctx.api
        .patch_http_route_status(&namespace, &route.name_any(), &status)
        .await?;

    if let Ok(action) = &result {
        if *action == Action::await_change() {
            info!(parents = parents.len(), "route materialized");
        }
    }
    result
}

/// Render and apply the route family, returning templates still pending
async fn materialize(
    ctx: &Context,
    route: &HTTPRoute,
    gateway: &Gateway,
    params: &GatewayClassParameters,
    namespace: &str,
) -> Result<Vec<String>, ReconcileError> {
    let templates = &params.spec.http_route_template.resource_templates;
    if templates.is_empty() {
        return Ok(Vec::new());
    }
    let hostnames = collect_hostnames(
        gateway
            .listener_hostnames()
            .chain(route.spec.hostnames.iter().map(String::as_str)),
    );
    let values = TemplateValues::builder()
        .gateway(gateway)
        .http_route(route)
        .values(params.spec.values.clone())
        .hostnames(hostnames)
        .build()?;

    let run = ctx
        .converger
        .run(templates, &values, namespace, &ctx.shutdown)
        .await?;
    let report = ctx
        .applier
        .apply(&run, &ParentRef::from_resource(route), &ctx.shutdown)
        .await?;
    Ok(report.pending)
}

/// Gateway parentRefs whose Gateway belongs to one of our classes
async fn our_parents(
    ctx: &Context,
    route: &HTTPRoute,
    namespace: &str,
) -> Result<Vec<ParentReference>, ReconcileError> {
    let mut parents = Vec::new();
    for parent in route.spec.parent_refs.iter().filter(|p| p.is_gateway()) {
        let Some(gateway) = ctx
            .api
            .get_gateway(parent.namespace_or(namespace), &parent.name)
            .await?
        else {
            continue;
        };
        if is_ours(ctx, &gateway).await? {
            parents.push(parent.clone());
        }
    }
    Ok(parents)
}

async fn is_ours(ctx: &Context, gateway: &Gateway) -> Result<bool, ReconcileError> {
    Ok(ctx
        .api
        .get_gateway_class(&gateway.spec.gateway_class_name)
        .await?
        .is_some_and(|gwc| is_our_gateway_class(&gwc, &ctx.config.controller_name)))
}

/// Status with one entry per parent of ours. Entries written by other
/// controllers are kept.
fn route_status(
    route: &HTTPRoute,
    controller_name: &str,
    parents: &[ParentReference],
    condition: Condition,
) -> HTTPRouteStatus {
    let previous = route.status.clone().unwrap_or_default();
    let (mut ours, mut entries): (Vec<_>, Vec<_>) = previous
        .parents
        .into_iter()
        .partition(|p| p.controller_name == controller_name);

    for parent_ref in parents {
        let mut conditions = ours
            .iter()
            .position(|p| &p.parent_ref == parent_ref)
            .map(|i| ours.swap_remove(i).conditions)
            .unwrap_or_default();
        set_condition(&mut conditions, condition.clone());
        entries.push(RouteParentStatus {
            parent_ref: parent_ref.clone(),
            controller_name: controller_name.to_string(),
            conditions,
        });
    }

    HTTPRouteStatus { parents: entries }
}

/// Requeue a failed HTTPRoute reconciliation
pub fn error_policy(route: Arc<HTTPRoute>, error: &ReconcileError, ctx: Arc<Context>) -> Action {
    if error.is_cancelled() {
        debug!(route = %route.name_any(), "reconciliation cancelled");
        return Action::await_change();
    }
    error!(?error, route = %route.name_any(), "reconciliation failed");
    Action::requeue(ctx.config.error_requeue())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use cgc_templating::testing::FakeCluster;

    use super::*;
    use crate::controller::test_support::{context, StatusCapture};
    use crate::lookup::fixtures::{gateway, gateway_class, parameters, parent_ref, route};
    use crate::lookup::MockGatewayApi;

    const ROUTE_CM: &str = r#"apiVersion: v1
kind: ConfigMap
metadata:
  name: {{ HTTPRoute.metadata.name }}-dns
data:
  gateway: {{ Gateway.metadata.name }}
  hosts: {{ Hostnames.Union | join(",") | quote }}
"#;

    const NEEDS_SIBLING: &str = r#"apiVersion: v1
kind: ConfigMap
metadata:
  name: {{ HTTPRoute.metadata.name }}-lb
data:
  ip: {{ Resources.dns.data.ip }}
"#;

    /// Mock API with gateways `edge/gw` (ours) and `edge/foreign` (not ours)
    fn api_with(
        route_templates: &'static [(&'static str, &'static str)],
    ) -> (MockGatewayApi, StatusCapture<HTTPRouteStatus>) {
        let mut api = MockGatewayApi::new();
        api.expect_get_gateway().returning(|ns, name| {
            let class = if name == "foreign" { "other" } else { "cloud" };
            Ok(Some(gateway(ns, name, class, &["*.example.com"])))
        });
        api.expect_get_gateway_class().returning(|name| {
            let mut gwc = gateway_class(name, Some("p"));
            if name == "other" {
                gwc.spec.controller_name = "example.com/other".to_string();
            }
            Ok(Some(gwc))
        });
        api.expect_get_parameters()
            .returning(move |name| Ok(Some(parameters(name, &[], route_templates))));

        let capture = StatusCapture::new();
        let sink = capture.clone();
        api.expect_patch_http_route_status()
            .returning(move |_, _, status| {
                sink.record(status.clone());
                Ok(())
            });
        (api, capture)
    }

    /// Story: A route attached to one of our gateways gets its resources
    /// applied in its own namespace, owned by the route, and is accepted on
    /// that parent.
    #[tokio::test]
    async fn story_route_resources_are_applied() {
        let cluster = Arc::new(FakeCluster::with_common_types());
        let (api, capture) = api_with(&[("dns", ROUTE_CM)]);
        let ctx = context(api, &cluster);
        let r = route("apps", "web", vec![parent_ref("gw", Some("edge"))], &["web.example.com"]);

        let action = reconcile(Arc::new(r), ctx).await.unwrap();
        assert_eq!(action, Action::await_change());

        let cm = cluster.type_for("v1", "ConfigMap").unwrap();
        let obj = cluster.object(&cm, Some("apps"), "web-dns").unwrap();
        assert_eq!(obj["data"]["gateway"], "gw");
        assert_eq!(obj["data"]["hosts"], "*.example.com,web.example.com");
        assert_eq!(obj["metadata"]["ownerReferences"][0]["kind"], "HTTPRoute");

        let status = capture.last().unwrap();
        assert_eq!(status.parents.len(), 1);
        assert_eq!(status.parents[0].parent_ref.name, "gw");
        assert_eq!(status.parents[0].conditions[0].status, ConditionStatus::True);
    }

    /// Story: Only parents on gateways of our classes get a status entry,
    /// and entries of other controllers survive.
    #[tokio::test]
    async fn story_status_only_for_our_parents() {
        let cluster = Arc::new(FakeCluster::with_common_types());
        let (api, capture) = api_with(&[("dns", ROUTE_CM)]);
        let ctx = context(api, &cluster);

        let mut r = route(
            "apps",
            "web",
            vec![parent_ref("gw", Some("edge")), parent_ref("foreign", Some("edge"))],
            &[],
        );
        r.status = Some(HTTPRouteStatus {
            parents: vec![RouteParentStatus {
                parent_ref: parent_ref("foreign", Some("edge")),
                controller_name: "example.com/other".to_string(),
                conditions: vec![],
            }],
        });

        reconcile(Arc::new(r), ctx).await.unwrap();

        let status = capture.last().unwrap();
        let controllers: Vec<_> = status
            .parents
            .iter()
            .map(|p| (p.parent_ref.name.as_str(), p.controller_name.as_str()))
            .collect();
        assert_eq!(
            controllers,
            vec![("foreign", "example.com/other"), ("gw", cgc_common::CONTROLLER_NAME)]
        );
    }

    /// Story: A template waiting on a sibling that never fills in keeps the
    /// route pending and the controller checks again later.
    #[tokio::test]
    async fn story_pending_template_requeues() {
        let cluster = Arc::new(FakeCluster::with_common_types());
        let (api, capture) = api_with(&[("dns", ROUTE_CM), ("lb", NEEDS_SIBLING)]);
        let ctx = context(api, &cluster);
        let r = route("apps", "web", vec![parent_ref("gw", Some("edge"))], &[]);

        let action = reconcile(Arc::new(r), ctx).await.unwrap();

        assert_eq!(action, Action::requeue(Duration::from_secs(5)));
        let condition = &capture.last().unwrap().parents[0].conditions[0];
        assert_eq!(condition.status, ConditionStatus::False);
        assert_eq!(condition.reason, "Pending");
        assert!(condition.message.contains("lb"));
    }

    /// Story: A route that does not name a Gateway parent is ignored.
    #[tokio::test]
    async fn story_route_without_gateway_parent() {
        let cluster = Arc::new(FakeCluster::with_common_types());
        let ctx = context(MockGatewayApi::new(), &cluster);
        let mut parent = parent_ref("svc", None);
        parent.kind = Some("Service".to_string());
        parent.group = Some(String::new());

        let action = reconcile(Arc::new(route("apps", "web", vec![parent], &[])), ctx)
            .await
            .unwrap();
        assert_eq!(action, Action::await_change());
    }

    /// Story: A route created before its gateway waits for it.
    #[tokio::test]
    async fn story_missing_gateway_requeues() {
        let mut api = MockGatewayApi::new();
        api.expect_get_gateway().returning(|_, _| Ok(None));
        let ctx = context(api, &Arc::new(FakeCluster::with_common_types()));

        let r = route("apps", "web", vec![parent_ref("gw", None)], &[]);
        let action = reconcile(Arc::new(r), ctx).await.unwrap();
        assert_eq!(action, Action::requeue(Duration::from_secs(5)));
    }

    /// Story: With no route templates the route is still accepted.
    #[tokio::test]
    async fn story_empty_route_family_is_accepted() {
        let cluster = Arc::new(FakeCluster::with_common_types());
        let (api, capture) = api_with(&[]);
        let ctx = context(api, &cluster);
        let r = route("apps", "web", vec![parent_ref("gw", Some("edge"))], &[]);

        let action = reconcile(Arc::new(r), ctx).await.unwrap();
        assert_eq!(action, Action::await_change());
        assert_eq!(cluster.apply_count(), 0);
        assert_eq!(
            capture.last().unwrap().parents[0].conditions[0].status,
            ConditionStatus::True
        );
    }

    /// Route that was accepted on `edge/gw` by an earlier reconcile
    fn accepted_route() -> HTTPRoute {
        let mut r = route("apps", "web", vec![parent_ref("gw", Some("edge"))], &[]);
        r.status = Some(HTTPRouteStatus {
            parents: vec![RouteParentStatus {
                parent_ref: parent_ref("gw", Some("edge")),
                controller_name: cgc_common::CONTROLLER_NAME.to_string(),
                conditions: vec![accepted(
                    ConditionStatus::True,
                    REASON_ACCEPTED,
                    "route accepted",
                    Some(1),
                )],
            }],
        });
        r
    }

    /// Story: An accepted route whose templates all stop compiling loses its
    /// Accepted condition instead of keeping the stale one.
    #[tokio::test]
    async fn story_broken_templates_revoke_acceptance() {
        let cluster = Arc::new(FakeCluster::with_common_types());
        let (api, capture) = api_with(&[("a", "{% if %}"), ("b", "{{ unclosed")]);
        let ctx = context(api, &cluster);

        let result = reconcile(Arc::new(accepted_route()), ctx).await;

        assert!(matches!(
            result,
            Err(ReconcileError::Materialize(MaterializeError::Template(_)))
        ));
        assert!(capture.was_updated());
        let status = capture.last().unwrap();
        assert_eq!(status.parents.len(), 1);
        let condition = &status.parents[0].conditions[0];
        assert_eq!(condition.status, ConditionStatus::False);
        assert_eq!(condition.reason, "InvalidParameters");
        assert_eq!(cluster.apply_count(), 0);
    }

    /// Story: When the class's parameters disappear, an accepted route is
    /// marked not accepted and checked again later.
    #[tokio::test]
    async fn story_missing_parameters_revoke_acceptance() {
        let mut api = MockGatewayApi::new();
        api.expect_get_gateway()
            .returning(|ns, name| Ok(Some(gateway(ns, name, "cloud", &[]))));
        api.expect_get_gateway_class()
            .returning(|name| Ok(Some(gateway_class(name, Some("p")))));
        api.expect_get_parameters().returning(|_| Ok(None));
        let capture = StatusCapture::new();
        let sink = capture.clone();
        api.expect_patch_http_route_status()
            .returning(move |_, _, status| {
                sink.record(status.clone());
                Ok(())
            });
        let ctx = context(api, &Arc::new(FakeCluster::with_common_types()));

        let action = reconcile(Arc::new(accepted_route()), ctx).await.unwrap();

        assert_eq!(action, Action::requeue(Duration::from_secs(5)));
        let condition = &capture.last().unwrap().parents[0].conditions[0];
        assert_eq!(condition.status, ConditionStatus::False);
        assert_eq!(condition.reason, "InvalidParameters");
        assert!(condition.message.contains("not found"));
    }
}
