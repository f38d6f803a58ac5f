//! Cloud gateway controller
//!
//! Watches GatewayClasses, Gateways and HTTPRoutes. For every Gateway and
//! HTTPRoute of a class owned by this controller, the class's
//! GatewayClassParameters templates are materialized into cluster resources.

#![deny(missing_docs)]

pub mod config;
pub mod controller;
pub mod converge;
pub mod error;
pub mod lookup;

pub use config::{Config, LogFormat};
pub use error::ReconcileError;
