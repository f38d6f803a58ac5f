//! GatewayClass reconciler
//!
//! Accepts classes owned by this controller once their parameters resolve.

use std::sync::Arc;

use cgc_common::crd::{set_condition, ConditionStatus, GatewayClass};
use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::{error, info, instrument, warn};

use super::{accepted, Context, REASON_ACCEPTED, REASON_INVALID_PARAMETERS};
use crate::error::ReconcileError;
use crate::lookup::{is_our_gateway_class, lookup_parameters};

/// Reconcile a GatewayClass
#[instrument(skip(gwc, ctx), fields(gateway_class = %gwc.name_any()))]
pub async fn reconcile(gwc: Arc<GatewayClass>, ctx: Arc<Context>) -> Result<Action, ReconcileError> {
    if !is_our_gateway_class(&gwc, &ctx.config.controller_name) {
        return Ok(Action::await_change());
    }

    let (condition, action) = match lookup_parameters(ctx.api.as_ref(), &gwc).await {
        Ok(_) => (
            accepted(
                ConditionStatus::True,
                REASON_ACCEPTED,
                "parameters resolved",
                gwc.metadata.generation,
            ),
            Action::await_change(),
        ),
        Err(e) if e.is_dependency_missing() => {
            warn!(error = %e, "gateway class parameters unavailable");
            (
                accepted(
                    ConditionStatus::False,
                    REASON_INVALID_PARAMETERS,
                    e.to_string(),
                    gwc.metadata.generation,
                ),
                Action::requeue(ctx.config.requeue()),
            )
        }
        Err(e) => return Err(e),
    };

    let mut status = gwc.status.clone().unwrap_or_default();
    let accepted_now = condition.status == ConditionStatus::True;
    set_condition(&mut status.conditions, condition);
    ctx.api
        .patch_gateway_class_status(&gwc.name_any(), &status)
        .await?;

    if accepted_now {
        info!("gateway class accepted");
    }
    Ok(action)
}

/// Requeue a failed GatewayClass reconciliation
pub fn error_policy(gwc: Arc<GatewayClass>, error: &ReconcileError, ctx: Arc<Context>) -> Action {
    error!(?error, gateway_class = %gwc.name_any(), "reconciliation failed");
    Action::requeue(ctx.config.error_requeue())
}
