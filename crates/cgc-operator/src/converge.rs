//! Convergence loop
//!
//! Drives materialization passes for one reconciliation. Between passes the
//! current states fetched so far are folded back into the value context so
//! templates referencing `Resources` can render.

use std::collections::BTreeMap;
use std::sync::Arc;

use cgc_templating::{
    build_resource_values, MaterializationRun, MaterializeError, Materializer, TemplateCompiler,
    TemplateValues,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Runs passes until the run completes or stops making progress
#[derive(Clone)]
pub struct Converger {
    compiler: TemplateCompiler,
    materializer: Materializer,
    max_passes: u32,
}

impl Converger {
    /// Create a converger. `max_passes` below one is treated as one.
    pub fn new(compiler: TemplateCompiler, materializer: Materializer, max_passes: u32) -> Self {
        Self {
            compiler,
            materializer,
            max_passes: max_passes.max(1),
        }
    }

    /// Compile `templates` and drive passes over them.
    ///
    /// A pass that changes no record triggers exactly one more pass, flagged
    /// final. The last allowed pass is always final.
    ///
    /// # Errors
    ///
    /// [`MaterializeError::Template`] if the set cannot be compiled at all,
    /// [`MaterializeError::Cancelled`] if `cancel` fires mid-pass.
    pub async fn run(
        &self,
        templates: &BTreeMap<String, String>,
        base: &TemplateValues,
        namespace: &str,
        cancel: &CancellationToken,
    ) -> Result<MaterializationRun, MaterializeError> {
        let set = self.compiler.compile(templates)?;
        let mut run = MaterializationRun::new(Arc::new(set));
        let mut values = base.clone();
        let mut final_next = false;

        loop {
            let is_final = final_next || run.pass() + 1 >= self.max_passes;
            let outcome = self
                .materializer
                .run_pass(&run, &values, namespace, is_final, cancel)
                .await;
            if outcome.cancelled {
                return Err(MaterializeError::Cancelled);
            }

            let stalled = outcome.run.resources() == run.resources();
            run = outcome.run;

            if run.is_complete() || is_final {
                break;
            }
            if stalled {
                debug!(pass = run.pass(), "no progress, running final pass");
                final_next = true;
            }
            values = base.with_resources(build_resource_values(run.resources()));
        }

        info!(
            passes = run.pass(),
            total = run.resources().len(),
            rendered = run.rendered_count(),
            pending = ?run.pending(),
            "materialization converged"
        );
        Ok(run)
    }
}
