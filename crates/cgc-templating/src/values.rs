//! Value context handed to every template
//!
//! Templates see these top-level keys:
//! - `Gateway` - the parent Gateway (always present)
//! - `HTTPRoute` - the parent HTTPRoute (HTTPRoute family only)
//! - `Values` - free-form values from GatewayClassParameters
//! - `Resources` - current state of sibling resources, keyed by template name
//! - `Hostnames.Union` / `Hostnames.Intersection`
//!
//! Everything but `Resources` is fixed for a materialization. `Resources` is
//! replaced between passes via [`TemplateValues::with_resources`].

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use serde_json::{json, Map, Value as JsonValue};

use crate::error::TemplateError;

/// Hostname sets across gateway listeners and attached routes
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Hostnames {
    /// All hostnames, deduplicated and sorted
    pub union: Vec<String>,
    /// `union` without entries covered by a wildcard in `union`
    pub intersection: Vec<String>,
}

/// Build the hostname sets from any number of hostname sources.
///
/// ```
/// use cgc_templating::collect_hostnames;
///
/// let h = collect_hostnames(["*.example.com", "www.example.com", "example.com"]);
/// assert_eq!(h.union, vec!["*.example.com", "example.com", "www.example.com"]);
/// assert_eq!(h.intersection, vec!["*.example.com", "example.com"]);
/// ```
pub fn collect_hostnames<I, S>(hostnames: I) -> Hostnames
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let union: Vec<String> = hostnames
        .into_iter()
        .map(|h| h.as_ref().trim().to_string())
        .filter(|h| !h.is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let intersection = union
        .iter()
        .filter(|host| !union.iter().any(|w| wildcard_covers(w, host)))
        .cloned()
        .collect();

    Hostnames {
        union,
        intersection,
    }
}

/// Whether `wildcard` (`*.example.com`) covers `host`.
///
/// A wildcard covers names with at least one extra label, including narrower
/// wildcards, but never the bare domain or itself.
fn wildcard_covers(wildcard: &str, host: &str) -> bool {
    let Some(domain) = wildcard.strip_prefix('*') else {
        return false;
    };
    if !domain.starts_with('.') || wildcard == host {
        return false;
    }
    host.len() > domain.len() && host.ends_with(domain)
}

/// Immutable value context for one materialization
#[derive(Clone, Debug)]
pub struct TemplateValues {
    gateway: JsonValue,
    http_route: Option<JsonValue>,
    values: BTreeMap<String, JsonValue>,
    resources: BTreeMap<String, JsonValue>,
    hostnames: Hostnames,
}

impl TemplateValues {
    /// Create a new builder
    pub fn builder() -> TemplateValuesBuilder {
        TemplateValuesBuilder::default()
    }

    /// Copy of these values with `Resources` replaced.
    ///
    /// Template names containing `-` are also exposed under an `_` alias so
    /// they can be addressed with dot syntax (`Resources.my_svc`).
    pub fn with_resources(&self, resources: BTreeMap<String, JsonValue>) -> Self {
        let mut aliased = resources.clone();
        for (name, doc) in resources {
            if name.contains('-') {
                aliased.entry(name.replace('-', "_")).or_insert(doc);
            }
        }
        Self {
            resources: aliased,
            ..self.clone()
        }
    }

    /// Sibling resources currently visible to templates
    pub fn resources(&self) -> &BTreeMap<String, JsonValue> {
        &self.resources
    }

    /// The context as a JSON document
    pub fn to_json(&self) -> JsonValue {
        let mut ctx = Map::new();
        ctx.insert("Gateway".to_string(), self.gateway.clone());
        if let Some(route) = &self.http_route {
            ctx.insert("HTTPRoute".to_string(), route.clone());
        }
        ctx.insert("Values".to_string(), json!(self.values));
        ctx.insert("Resources".to_string(), json!(self.resources));
        ctx.insert("Hostnames".to_string(), json!(self.hostnames));
        JsonValue::Object(ctx)
    }

    /// The context as a minijinja value for rendering
    pub fn to_context(&self) -> minijinja::Value {
        minijinja::Value::from_serialize(self.to_json())
    }
}

/// Builder for [`TemplateValues`]
#[derive(Debug, Default)]
pub struct TemplateValuesBuilder {
    gateway: Option<Result<JsonValue, TemplateError>>,
    http_route: Option<Result<JsonValue, TemplateError>>,
    values: BTreeMap<String, JsonValue>,
    hostnames: Hostnames,
}

impl TemplateValuesBuilder {
    /// Set the parent Gateway
    pub fn gateway<T: Serialize>(mut self, gateway: &T) -> Self {
        self.gateway = Some(project("Gateway", gateway));
        self
    }

    /// Set the parent HTTPRoute
    pub fn http_route<T: Serialize>(mut self, route: &T) -> Self {
        self.http_route = Some(project("HTTPRoute", route));
        self
    }

    /// Set the free-form values
    pub fn values(mut self, values: BTreeMap<String, JsonValue>) -> Self {
        self.values = values;
        self
    }

    /// Set the hostname sets
    pub fn hostnames(mut self, hostnames: Hostnames) -> Self {
        self.hostnames = hostnames;
        self
    }

    /// Build the context, failing if a parent could not be projected
    pub fn build(self) -> Result<TemplateValues, TemplateError> {
        let gateway = self.gateway.ok_or_else(|| TemplateError::Projection {
            kind: "Gateway".to_string(),
            message: "no parent Gateway supplied".to_string(),
        })??;
        let http_route = self.http_route.transpose()?;

        Ok(TemplateValues {
            gateway,
            http_route,
            values: self.values,
            resources: BTreeMap::new(),
            hostnames: self.hostnames,
        })
    }
}

/// Project a parent object into a JSON mapping
fn project<T: Serialize>(kind: &str, obj: &T) -> Result<JsonValue, TemplateError> {
    match serde_json::to_value(obj) {
        Ok(doc @ JsonValue::Object(_)) => Ok(doc),
        Ok(other) => Err(TemplateError::Projection {
            kind: kind.to_string(),
            message: format!("expected a mapping, got {other}"),
        }),
        Err(e) => Err(TemplateError::Projection {
            kind: kind.to_string(),
            message: e.to_string(),
        }),
    }
}
