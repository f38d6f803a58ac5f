//! Controllers for GatewayClass, Gateway and HTTPRoute
//!
//! All three share one [`Context`]. Every collaborator that talks to the API
//! server sits behind a trait object so the reconcilers can run against mocks
//! and the in-memory cluster in tests.

use std::sync::Arc;

use cgc_common::crd::{Condition, ConditionStatus};
use cgc_templating::{
    Applier, FunctionRegistry, KubeResourceClient, Materializer, ResourceClient, TemplateCompiler,
};
use kube::Client;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::converge::Converger;
use crate::lookup::{GatewayApi, KubeGatewayApi};

pub mod gateway;
pub mod gatewayclass;
pub mod httproute;

/// Condition type reported on every object this controller handles
pub const ACCEPTED: &str = "Accepted";

/// Reason for a successfully processed object
pub const REASON_ACCEPTED: &str = "Accepted";

/// Reason for a GatewayClass whose parameters cannot be used
pub const REASON_INVALID_PARAMETERS: &str = "InvalidParameters";

/// Reason for an object whose resources are not fully materialized yet
pub const REASON_PENDING: &str = "Pending";

/// Shared state for all reconcilers
pub struct Context {
    /// Gateway API access (trait object for testability)
    pub api: Arc<dyn GatewayApi>,
    /// Drives materialization passes
    pub converger: Converger,
    /// Applies materialized resources
    pub applier: Applier,
    /// Runtime configuration
    pub config: Config,
    /// Fires on shutdown, aborting in-flight materializations
    pub shutdown: CancellationToken,
}

impl Context {
    /// Create a context talking to the cluster through `client`
    pub fn new(client: Client, config: Config, shutdown: CancellationToken) -> Self {
        Self::from_parts(
            Arc::new(KubeGatewayApi::new(client.clone())),
            Arc::new(KubeResourceClient::new(client)),
            config,
            shutdown,
        )
    }

    /// Create a context from explicit collaborators
    pub fn from_parts(
        api: Arc<dyn GatewayApi>,
        resources: Arc<dyn ResourceClient>,
        config: Config,
        shutdown: CancellationToken,
    ) -> Self {
        let compiler = TemplateCompiler::new(Arc::new(FunctionRegistry::standard()));
        let converger = Converger::new(
            compiler,
            Materializer::new(resources.clone()),
            config.max_passes,
        );
        let applier = Applier::with_field_manager(resources, config.controller_name.clone());
        Self {
            api,
            converger,
            applier,
            config,
            shutdown,
        }
    }
}

/// `Accepted` condition for an object at `generation`
pub(crate) fn accepted(
    status: ConditionStatus,
    reason: &str,
    message: impl Into<String>,
    generation: Option<i64>,
) -> Condition {
    Condition::new(ACCEPTED, status, reason, message).with_observed_generation(generation)
}
