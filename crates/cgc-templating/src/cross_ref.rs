//! Sibling cross-references
//!
//! Folds the current state of every fetched resource into the `Resources`
//! map of the next pass's value context.

use std::collections::BTreeMap;

use serde_json::Value as JsonValue;

use crate::composite::CompositeResource;

/// Map template name to current document for every resource that exists
pub fn build_resource_values(resources: &[CompositeResource]) -> BTreeMap<String, JsonValue> {
    resources
        .iter()
        .filter_map(|r| {
            r.current()
                .document()
                .map(|doc| (r.template().to_string(), doc.clone()))
        })
        .collect()
}
