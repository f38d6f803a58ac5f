//! Materialization driver
//!
//! Runs exactly one pass over a [`MaterializationRun`]. For each resource, in
//! order: render if not rendered, resolve its type if not resolved, fetch its
//! current state if it is not known to exist. A failing step skips the rest
//! of that resource for this pass and the driver moves on to the next one.
//!
//! The driver keeps no state between calls. Each pass returns a new run; the
//! caller decides how many passes to drive and which one is final.

use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use crate::client::ResourceClient;
use crate::composite::{CompositeResource, MaterializationRun};
use crate::fetch::fetch_current;
use crate::resolver::resolve_type;
use crate::values::TemplateValues;

/// Result of one pass
#[derive(Debug, Clone)]
pub struct PassOutcome {
    /// Records after this pass
    pub run: MaterializationRun,
    /// Resources with a rendered document
    pub rendered: usize,
    /// Resources with a determined current state (present or absent)
    pub current: usize,
    /// The pass stopped early because it was cancelled
    pub cancelled: bool,
}

/// Drives materialization passes against a cluster
#[derive(Clone)]
pub struct Materializer {
    client: Arc<dyn ResourceClient>,
}

impl Materializer {
    /// Create a driver using the given client
    pub fn new(client: Arc<dyn ResourceClient>) -> Self {
        Self { client }
    }

    /// Run one pass.
    ///
    /// `namespace` is the parent's namespace, used for every namespaced
    /// lookup. With `is_final` set, render failures are logged as errors;
    /// otherwise they are expected to clear up on a later pass.
    pub async fn run_pass(
        &self,
        run: &MaterializationRun,
        values: &TemplateValues,
        namespace: &str,
        is_final: bool,
        cancel: &CancellationToken,
    ) -> PassOutcome {
        let mut resources = Vec::with_capacity(run.resources().len());
        let mut cancelled = false;

        for resource in run.resources() {
            if cancelled || cancel.is_cancelled() {
                cancelled = true;
                resources.push(resource.clone());
                continue;
            }
            resources.push(
                self.advance(run, resource.clone(), values, namespace, is_final, cancel)
                    .await,
            );
        }

        let next = run.next(resources);
        let outcome = PassOutcome {
            rendered: next.rendered_count(),
            current: next.current_count(),
            cancelled: cancelled || cancel.is_cancelled(),
            run: next,
        };
        debug!(
            pass = outcome.run.pass(),
            total = outcome.run.resources().len(),
            rendered = outcome.rendered,
            current = outcome.current,
            cancelled = outcome.cancelled,
            "materialization pass complete"
        );
        outcome
    }

    async fn advance(
        &self,
        run: &MaterializationRun,
        mut resource: CompositeResource,
        values: &TemplateValues,
        namespace: &str,
        is_final: bool,
        cancel: &CancellationToken,
    ) -> CompositeResource {
        let template = resource.template().to_string();

        if resource.rendered().is_none() {
            match run.templates().render(&template, values) {
                Ok(doc) => resource = resource.with_rendered(doc),
                Err(e) => {
                    if is_final {
                        error!(template = %template, error = %e, "template failed to render");
                    } else {
                        debug!(template = %template, error = %e, "template not renderable yet");
                    }
                    if let Some(record) = run.templates().record(&template) {
                        trace!(template = %template, source = %record.source(), "template source");
                    }
                    trace!(template = %template, values = %values.to_json(), "template values");
                    return resource;
                }
            }
        }

        let Some(doc) = resource.rendered().cloned() else {
            return resource;
        };

        if resource.type_identity().is_none() {
            let Some(result) = or_cancel(cancel, resolve_type(self.client.as_ref(), &doc)).await
            else {
                return resource;
            };
            match result {
                Ok(ty) => resource = resource.with_type_identity(ty),
                Err(e) => {
                    warn!(template = %template, error = %e, "cannot resolve resource type");
                    return resource;
                }
            }
        }

        let Some(ty) = resource.type_identity().cloned() else {
            return resource;
        };

        if resource.current().document().is_none() {
            let Some(result) =
                or_cancel(cancel, fetch_current(self.client.as_ref(), &ty, namespace, &doc)).await
            else {
                return resource;
            };
            match result {
                Ok(state) => resource = resource.with_current(state),
                Err(e) => {
                    warn!(
                        template = %template,
                        kind = %ty.kind,
                        namespace = %namespace,
                        error = %e,
                        "cannot fetch current state"
                    );
                }
            }
        }

        resource
    }
}

/// Race a client call against cancellation
pub(crate) async fn or_cancel<F: Future>(cancel: &CancellationToken, fut: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        out = fut => Some(out),
    }
}
