//! Resource templating and materialization engine
//!
//! Turns a set of named templates plus a value context into applied cluster
//! resources. A materialization runs in passes:
//!
//! 1. render every template that has not rendered yet
//! 2. resolve the resource type of every rendered document
//! 3. fetch the current state of every resolved resource
//!
//! Between passes the fetched states are folded back into the value context
//! as `Resources`, so templates can reference their siblings. Once the caller
//! is done driving passes, the [`Applier`] server-side applies every resolved
//! resource with a controller owner reference to the parent.

#![deny(missing_docs)]

pub mod applier;
pub mod client;
pub mod compiler;
pub mod composite;
pub mod cross_ref;
pub mod driver;
pub mod error;
pub mod fetch;
pub mod functions;
pub mod resolver;
pub mod values;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use applier::{ApplyReport, Applier, ParentRef};
pub use client::{KubeResourceClient, ResourceClient};
pub use compiler::{TemplateCompiler, TemplateRecord, TemplateSet};
pub use composite::{CompositeResource, CurrentState, MaterializationRun, TypeIdentity};
pub use cross_ref::build_resource_values;
pub use driver::{Materializer, PassOutcome};
pub use error::{ApplyError, MaterializeError, ResolveError, TemplateError};
pub use functions::FunctionRegistry;
pub use values::{collect_hostnames, Hostnames, TemplateValues};
