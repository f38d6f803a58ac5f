//! Shared Kubernetes utilities
//!
//! Helpers for working with untyped resource documents (`serde_json::Value`)
//! the way the templating engine needs them: apiVersion parsing, metadata
//! access and controller owner references.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use serde_json::Value;

use crate::Error;

/// Parse an apiVersion into (group, version), rejecting malformed input.
///
/// The core group has no prefix (`v1` -> `("", "v1")`). Anything with an
/// empty segment or more than one `/` is invalid.
///
/// # Examples
/// ```
/// use cgc_common::kube_utils::parse_api_version;
///
/// let (group, version) = parse_api_version("cert-manager.io/v1").unwrap();
/// assert_eq!(group, "cert-manager.io");
/// assert_eq!(version, "v1");
///
/// let (group, version) = parse_api_version("v1").unwrap();
/// assert_eq!(group, "");
/// assert_eq!(version, "v1");
///
/// assert!(parse_api_version("a/b/c").is_err());
/// ```
pub fn parse_api_version(api_version: &str) -> Result<(String, String), Error> {
    let invalid = || {
        Error::validation_for_field(
            api_version,
            "apiVersion",
            format!("malformed apiVersion {:?}", api_version),
        )
    };

    let mut parts = api_version.split('/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(version), None, None) if !version.is_empty() => {
            Ok((String::new(), version.to_string()))
        }
        (Some(group), Some(version), None) if !group.is_empty() && !version.is_empty() => {
            Ok((group.to_string(), version.to_string()))
        }
        _ => Err(invalid()),
    }
}

/// Read `metadata.name` from a resource document
pub fn object_name(doc: &Value) -> Option<&str> {
    doc.pointer("/metadata/name").and_then(Value::as_str)
}

/// Read `metadata.namespace` from a resource document
pub fn object_namespace(doc: &Value) -> Option<&str> {
    doc.pointer("/metadata/namespace").and_then(Value::as_str)
}

/// Build a controller owner reference pointing at `owner`.
///
/// `blockOwnerDeletion` is set so garbage collection waits for dependents.
pub fn controller_owner_ref(
    api_version: impl Into<String>,
    kind: impl Into<String>,
    name: impl Into<String>,
    uid: impl Into<String>,
) -> OwnerReference {
    OwnerReference {
        api_version: api_version.into(),
        kind: kind.into(),
        name: name.into(),
        uid: uid.into(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// Insert or replace the controller owner reference on a resource document.
///
/// An existing reference with the same uid is replaced. A different owner
/// already marked as controller is an error: an object can only have one
/// controller.
pub fn set_controller_reference(doc: &mut Value, owner: &OwnerReference) -> Result<(), Error> {
    let name = object_name(doc).unwrap_or("<unnamed>").to_string();
    let metadata = doc
        .as_object_mut()
        .ok_or_else(|| Error::validation_for(&name, "resource is not a mapping"))?
        .entry("metadata")
        .or_insert_with(|| Value::Object(Default::default()));
    let metadata = metadata
        .as_object_mut()
        .ok_or_else(|| Error::validation_for_field(&name, "metadata", "metadata is not a mapping"))?;

    let mut refs: Vec<OwnerReference> = match metadata.get("ownerReferences") {
        Some(existing) => serde_json::from_value(existing.clone())
            .map_err(|e| Error::serialization_for_kind("OwnerReference", e.to_string()))?,
        None => Vec::new(),
    };

    if let Some(other) = refs
        .iter()
        .find(|r| r.controller == Some(true) && r.uid != owner.uid)
    {
        return Err(Error::validation_for_field(
            &name,
            "metadata.ownerReferences",
            format!(
                "already controlled by {} {} ({})",
                other.kind, other.name, other.uid
            ),
        ));
    }

    refs.retain(|r| r.uid != owner.uid);
    refs.push(owner.clone());
    metadata.insert("ownerReferences".to_string(), serde_json::to_value(refs)?);
    Ok(())
}
