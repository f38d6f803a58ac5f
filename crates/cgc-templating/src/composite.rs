//! Per-template working records
//!
//! A [`CompositeResource`] only ever gains information. The `with_*`
//! transitions refuse to overwrite a field that is already set, so a pass can
//! add a rendered document, a type identity or a current state but never
//! retract one.

use std::sync::Arc;

use cgc_common::kube_utils::object_name;
use kube::discovery::ApiResource;
use serde_json::Value as JsonValue;

use crate::compiler::TemplateSet;

/// Resolved resource type of a rendered document
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TypeIdentity {
    /// API group, empty for the core group
    pub group: String,
    /// API version
    pub version: String,
    /// Kind
    pub kind: String,
    /// Plural resource name used in API paths
    pub plural: String,
    /// Whether the type is namespace-scoped
    pub namespaced: bool,
}

impl TypeIdentity {
    /// `group/version`, or just `version` for the core group
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    /// The kube-rs descriptor for dynamic API access
    pub fn api_resource(&self) -> ApiResource {
        ApiResource {
            group: self.group.clone(),
            version: self.version.clone(),
            api_version: self.api_version(),
            kind: self.kind.clone(),
            plural: self.plural.clone(),
        }
    }
}

/// What is known about a resource in the cluster
#[derive(Clone, Debug, Default, PartialEq)]
pub enum CurrentState {
    /// Not fetched yet
    #[default]
    Unknown,
    /// Fetched, does not exist
    Absent,
    /// Fetched, exists
    Present(JsonValue),
}

impl CurrentState {
    /// Whether a fetch has completed, found or not
    pub fn is_determined(&self) -> bool {
        !matches!(self, Self::Unknown)
    }

    /// The current document, if the resource exists
    pub fn document(&self) -> Option<&JsonValue> {
        match self {
            Self::Present(doc) => Some(doc),
            _ => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Unknown => 0,
            Self::Absent => 1,
            Self::Present(_) => 2,
        }
    }
}

/// Working record for one named template
#[derive(Clone, Debug, PartialEq)]
pub struct CompositeResource {
    template: String,
    rendered: Option<JsonValue>,
    type_identity: Option<TypeIdentity>,
    current: CurrentState,
}

impl CompositeResource {
    /// Fresh record for a template
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            rendered: None,
            type_identity: None,
            current: CurrentState::Unknown,
        }
    }

    /// Template name
    pub fn template(&self) -> &str {
        &self.template
    }

    /// Rendered document, once rendering succeeded
    pub fn rendered(&self) -> Option<&JsonValue> {
        self.rendered.as_ref()
    }

    /// Resolved type, once resolution succeeded
    pub fn type_identity(&self) -> Option<&TypeIdentity> {
        self.type_identity.as_ref()
    }

    /// Current cluster state
    pub fn current(&self) -> &CurrentState {
        &self.current
    }

    /// `metadata.name` of the rendered document
    pub fn resource_name(&self) -> Option<&str> {
        self.rendered.as_ref().and_then(object_name)
    }

    /// Rendered and type resolved, i.e. ready to apply
    pub fn is_resolved(&self) -> bool {
        self.rendered.is_some() && self.type_identity.is_some()
    }

    /// Resolved and with a determined current state
    pub fn is_complete(&self) -> bool {
        self.is_resolved() && self.current.is_determined()
    }

    /// Record the rendered document. Ignored if already rendered.
    pub(crate) fn with_rendered(mut self, doc: JsonValue) -> Self {
        if self.rendered.is_none() {
            self.rendered = Some(doc);
        }
        self
    }

    /// Record the type identity. Ignored if not rendered or already resolved.
    pub(crate) fn with_type_identity(mut self, ty: TypeIdentity) -> Self {
        if self.rendered.is_some() && self.type_identity.is_none() {
            self.type_identity = Some(ty);
        }
        self
    }

    /// Record the current state. Only upgrades: Unknown < Absent < Present.
    pub(crate) fn with_current(mut self, state: CurrentState) -> Self {
        if self.type_identity.is_some() && state.rank() > self.current.rank() {
            self.current = state;
        }
        self
    }
}

/// One materialization: the compiled templates and their records
#[derive(Clone, Debug)]
pub struct MaterializationRun {
    templates: Arc<TemplateSet>,
    resources: Vec<CompositeResource>,
    pass: u32,
}

impl MaterializationRun {
    /// Fresh run with one empty record per template
    pub fn new(templates: Arc<TemplateSet>) -> Self {
        let resources = templates
            .records()
            .iter()
            .map(|r| CompositeResource::new(r.name()))
            .collect();
        Self {
            templates,
            resources,
            pass: 0,
        }
    }

    /// The compiled templates
    pub fn templates(&self) -> &Arc<TemplateSet> {
        &self.templates
    }

    /// Records in template order
    pub fn resources(&self) -> &[CompositeResource] {
        &self.resources
    }

    /// Number of completed passes
    pub fn pass(&self) -> u32 {
        self.pass
    }

    /// Records with a rendered document
    pub fn rendered_count(&self) -> usize {
        self.resources.iter().filter(|r| r.rendered.is_some()).count()
    }

    /// Records with a determined current state (present or confirmed absent)
    pub fn current_count(&self) -> usize {
        self.resources
            .iter()
            .filter(|r| r.current.is_determined())
            .count()
    }

    /// Every record is rendered, resolved and fetched
    pub fn is_complete(&self) -> bool {
        self.resources.iter().all(CompositeResource::is_complete)
    }

    /// Names of templates that are not complete yet
    pub fn pending(&self) -> Vec<&str> {
        self.resources
            .iter()
            .filter(|r| !r.is_complete())
            .map(|r| r.template())
            .collect()
    }

    /// Successor run holding the records produced by one more pass
    pub(crate) fn next(&self, resources: Vec<CompositeResource>) -> Self {
        Self {
            templates: Arc::clone(&self.templates),
            resources,
            pass: self.pass + 1,
        }
    }
}
