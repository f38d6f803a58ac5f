//! Common types for the cloud gateway controller: CRDs, errors, and utilities

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod kube_utils;
pub mod yaml;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Name this controller claims GatewayClasses with.
///
/// Also used as the server-side-apply field manager for every resource the
/// controller materializes, so the controller always wins field conflicts on
/// resources it owns.
pub const CONTROLLER_NAME: &str = "github.com/tv2/cloud-gateway-controller";

/// API group of the controller's own CRDs
pub const PARAMETERS_GROUP: &str = "gateway.tv2.dk";

/// Kind referenced from `GatewayClass.spec.parametersRef`
pub const PARAMETERS_KIND: &str = "GatewayClassParameters";

/// Gateway API group
pub const GATEWAY_API_GROUP: &str = "gateway.networking.k8s.io";
