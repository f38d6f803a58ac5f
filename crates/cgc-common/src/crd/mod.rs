//! Custom Resource Definitions used by the controller
//!
//! - Gateway API resources the controller watches (GatewayClass, Gateway, HTTPRoute)
//! - The controller's own GatewayClassParameters, which carries the resource templates

mod gateway_api;
mod parameters;
mod types;

pub use gateway_api::{
    Gateway, GatewayClass, GatewayClassSpec, GatewayClassStatus, GatewaySpec, GatewayStatus,
    HTTPRoute, HTTPRouteSpec, HTTPRouteStatus, Listener, ParametersReference, ParentReference,
    RouteParentStatus,
};
pub use parameters::{GatewayClassParameters, GatewayClassParametersSpec, ResourceTemplateSet};
pub use types::{set_condition, Condition, ConditionStatus};
