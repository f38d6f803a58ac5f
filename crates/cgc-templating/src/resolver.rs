//! Type resolution for rendered documents

use cgc_common::kube_utils::parse_api_version;
use serde_json::Value as JsonValue;

use crate::client::ResourceClient;
use crate::composite::TypeIdentity;
use crate::error::ResolveError;

/// Resolve the resource type of a rendered document from its
/// `apiVersion` and `kind`.
pub async fn resolve_type(
    client: &dyn ResourceClient,
    doc: &JsonValue,
) -> Result<TypeIdentity, ResolveError> {
    let api_version = doc
        .get("apiVersion")
        .and_then(JsonValue::as_str)
        .ok_or(ResolveError::MissingField { field: "apiVersion" })?;
    let kind = doc
        .get("kind")
        .and_then(JsonValue::as_str)
        .ok_or(ResolveError::MissingField { field: "kind" })?;

    let (group, version) =
        parse_api_version(api_version).map_err(|_| ResolveError::InvalidApiVersion {
            api_version: api_version.to_string(),
        })?;

    client
        .resolve_type(&group, &version, kind)
        .await?
        .ok_or_else(|| ResolveError::UnknownKind {
            group,
            version,
            kind: kind.to_string(),
        })
}
