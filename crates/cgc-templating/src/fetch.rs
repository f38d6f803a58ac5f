//! Current-state lookup for resolved resources

use cgc_common::kube_utils::object_name;
use cgc_common::Error;
use serde_json::Value as JsonValue;

use crate::client::ResourceClient;
use crate::composite::{CurrentState, TypeIdentity};

/// Fetch the current state of a rendered resource.
///
/// Namespaced resources are always looked up in the parent's `namespace`.
/// A missing resource is [`CurrentState::Absent`], not an error.
pub async fn fetch_current(
    client: &dyn ResourceClient,
    ty: &TypeIdentity,
    namespace: &str,
    doc: &JsonValue,
) -> Result<CurrentState, Error> {
    let name = object_name(doc)
        .ok_or_else(|| Error::validation_for_field(&ty.kind, "metadata.name", "rendered document has no name"))?;
    let namespace = ty.namespaced.then_some(namespace);

    Ok(match client.get(ty, namespace, name).await? {
        Some(current) => CurrentState::Present(current),
        None => CurrentState::Absent,
    })
}
