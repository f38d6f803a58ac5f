//! Gateway reconciler
//!
//! Materializes the class's Gateway template family with the Gateway as
//! parent and reports the outcome in the `Accepted` condition.

use std::sync::Arc;

use cgc_common::crd::{set_condition, Condition, ConditionStatus, Gateway, GatewayStatus};
use cgc_templating::{
    collect_hostnames, ApplyError, MaterializeError, ParentRef, TemplateValues,
};
use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::{debug, error, info, instrument, warn};

use super::{accepted, Context, REASON_ACCEPTED, REASON_INVALID_PARAMETERS, REASON_PENDING};
use crate::error::ReconcileError;
use crate::lookup::{attached_routes, is_our_gateway_class, lookup_gateway_class, lookup_parameters};

/// Reconcile a Gateway
#[instrument(
    skip(gateway, ctx),
    fields(gateway = %gateway.name_any(), namespace = %gateway.namespace().unwrap_or_default())
)]
pub async fn reconcile(gateway: Arc<Gateway>, ctx: Arc<Context>) -> Result<Action, ReconcileError> {
    let namespace = gateway
        .namespace()
        .ok_or_else(|| ReconcileError::MissingNamespace {
            kind: "Gateway",
            name: gateway.name_any(),
        })?;
    let generation = gateway.metadata.generation;

    let gwc = match lookup_gateway_class(ctx.api.as_ref(), &gateway.spec.gateway_class_name).await {
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

    let params = match lookup_parameters(ctx.api.as_ref(), &gwc).await {
        Ok(params) => params,
        Err(e) if e.is_dependency_missing() => {
            warn!(error = %e, "gateway class parameters unavailable");
            let condition = accepted(
                ConditionStatus::False,
                REASON_INVALID_PARAMETERS,
                e.to_string(),
                generation,
            );
            update_status(&gateway, &ctx, condition).await?;
            return Ok(Action::requeue(ctx.config.requeue()));
        }
        Err(e) => return Err(e),
    };

    let templates = &params.spec.gateway_template.resource_templates;
    if templates.is_empty() {
        let condition = accepted(
            ConditionStatus::True,
            REASON_ACCEPTED,
            "no gateway templates",
            generation,
        );
        update_status(&gateway, &ctx, condition).await?;
        return Ok(Action::await_change());
    }

    let routes = attached_routes(ctx.api.as_ref(), &gateway).await?;
    let hostnames = collect_hostnames(
        gateway
            .listener_hostnames()
            .chain(routes.iter().flat_map(|r| r.spec.hostnames.iter().map(String::as_str))),
    );
    let values = TemplateValues::builder()
        .gateway(gateway.as_ref())
        .values(params.spec.values.clone())
        .hostnames(hostnames)
        .build()?;

    let run = match ctx
        .converger
        .run(templates, &values, &namespace, &ctx.shutdown)
        .await
    {
        Ok(run) => run,
        Err(MaterializeError::Template(e)) => {
            let condition = accepted(
                ConditionStatus::False,
                REASON_INVALID_PARAMETERS,
                e.to_string(),
                generation,
            );
            update_status(&gateway, &ctx, condition).await?;
            return Err(e.into());
        }
        Err(e) => return Err(e.into()),
    };

    let parent = ParentRef::from_resource(gateway.as_ref());
    match ctx.applier.apply(&run, &parent, &ctx.shutdown).await {
        Ok(report) if report.pending.is_empty() => {
            let condition = accepted(
                ConditionStatus::True,
                REASON_ACCEPTED,
                format!("{} resources applied", report.applied.len()),
                generation,
            );
            update_status(&gateway, &ctx, condition).await?;
            info!(applied = report.applied.len(), "gateway materialized");
            Ok(Action::await_change())
        }
        Ok(report) => {
            let condition = accepted(
                ConditionStatus::False,
                REASON_PENDING,
                format!("waiting for templates: {}", report.pending.join(", ")),
                generation,
            );
            update_status(&gateway, &ctx, condition).await?;
            debug!(pending = ?report.pending, "gateway templates pending");
            Ok(Action::requeue(ctx.config.requeue()))
        }
        Err(e @ ApplyError::Partial { .. }) => {
            let condition = accepted(ConditionStatus::False, REASON_PENDING, e.to_string(), generation);
            update_status(&gateway, &ctx, condition).await?;
            Err(e.into())
        }
        Err(e) => Err(e.into()),
    }
}

async fn update_status(
    gateway: &Gateway,
    ctx: &Context,
    condition: Condition,
) -> Result<(), ReconcileError> {
    // Only conditions are ours; addresses and listeners belong to other writers
    let mut status = GatewayStatus {
        conditions: gateway.status.clone().unwrap_or_default().conditions,
        ..GatewayStatus::default()
    };
    set_condition(&mut status.conditions, condition);
    ctx.api
        .patch_gateway_status(
            gateway.namespace().as_deref().unwrap_or_default(),
            &gateway.name_any(),
            &status,
        )
        .await?;
    Ok(())
}

/// Requeue a failed Gateway reconciliation
pub fn error_policy(gateway: Arc<Gateway>, error: &ReconcileError, ctx: Arc<Context>) -> Action {
    if error.is_cancelled() {
        debug!(gateway = %gateway.name_any(), "reconciliation cancelled");
        return Action::await_change();
    }
    error!(?error, gateway = %gateway.name_any(), "reconciliation failed");
    Action::requeue(ctx.config.error_requeue())
}
