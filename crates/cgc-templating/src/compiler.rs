//! Template compiler
//!
//! Compiles a named template map into a [`TemplateSet`]. A template that
//! fails to parse is kept with its error so siblings still compile; the error
//! resurfaces whenever that template is rendered.

use std::collections::BTreeMap;
use std::sync::Arc;

use cgc_common::yaml::parse_yaml_object;
use minijinja::{Environment, UndefinedBehavior};
use serde_json::Value as JsonValue;
use tracing::warn;

use crate::error::TemplateError;
use crate::functions::FunctionRegistry;
use crate::values::TemplateValues;

/// One named template
#[derive(Debug, Clone)]
pub struct TemplateRecord {
    name: String,
    source: String,
    compile_error: Option<TemplateError>,
}

impl TemplateRecord {
    /// Template name, unique within a set
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Raw template source
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Syntax error, if the template did not compile
    pub fn compile_error(&self) -> Option<&TemplateError> {
        self.compile_error.as_ref()
    }
}

/// Compiled templates, ordered by name
#[derive(Debug)]
pub struct TemplateSet {
    env: Environment<'static>,
    records: Vec<TemplateRecord>,
}

impl TemplateSet {
    /// All records in materialization order
    pub fn records(&self) -> &[TemplateRecord] {
        &self.records
    }

    /// Look up a record by name
    pub fn record(&self, name: &str) -> Option<&TemplateRecord> {
        self.records.iter().find(|r| r.name == name)
    }

    /// Number of templates in the set
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the set holds no templates
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Render one template and parse the output as a single resource document
    pub fn render(&self, name: &str, values: &TemplateValues) -> Result<JsonValue, TemplateError> {
        let record = self.record(name).ok_or_else(|| TemplateError::Render {
            template: name.to_string(),
            message: "no such template".to_string(),
        })?;
        if let Some(err) = &record.compile_error {
            return Err(err.clone());
        }

        let render_err = |e: minijinja::Error| TemplateError::Render {
            template: name.to_string(),
            message: e.to_string(),
        };
        let text = self
            .env
            .get_template(name)
            .and_then(|t| t.render(values.to_context()))
            .map_err(render_err)?;

        parse_yaml_object(&text)
            .map(JsonValue::Object)
            .map_err(|e| TemplateError::InvalidDocument {
                template: name.to_string(),
                message: e.to_string(),
            })
    }
}

/// Compiles template maps with a fixed function registry
#[derive(Debug, Clone)]
pub struct TemplateCompiler {
    registry: Arc<FunctionRegistry>,
}

impl Default for TemplateCompiler {
    fn default() -> Self {
        Self::new(Arc::new(FunctionRegistry::standard()))
    }
}

impl TemplateCompiler {
    /// Create a compiler bound to a function registry
    pub fn new(registry: Arc<FunctionRegistry>) -> Self {
        Self { registry }
    }

    /// Compile every template in the map.
    ///
    /// # Errors
    ///
    /// Fails only when the map is empty or when no template compiles.
    /// Individual syntax errors are stored on their records.
    pub fn compile(&self, templates: &BTreeMap<String, String>) -> Result<TemplateSet, TemplateError> {
        if templates.is_empty() {
            return Err(TemplateError::EmptyTemplateSet);
        }

        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.set_trim_blocks(true);
        self.registry.register(&mut env);

        let mut records = Vec::with_capacity(templates.len());
        for (name, source) in templates {
            let compile_error = env
                .add_template_owned(name.clone(), source.clone())
                .err()
                .map(|e| TemplateError::Syntax {
                    template: name.clone(),
                    message: e.to_string(),
                });
            if let Some(err) = &compile_error {
                warn!(template = %name, error = %err, "template failed to compile");
            }
            records.push(TemplateRecord {
                name: name.clone(),
                source: source.clone(),
                compile_error,
            });
        }

        if records.iter().all(|r| r.compile_error.is_some()) {
            return Err(TemplateError::NoCompilableTemplates {
                count: records.len(),
            });
        }

        Ok(TemplateSet { env, records })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn templates(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn values() -> TemplateValues {
        TemplateValues::builder()
            .gateway(&json!({"metadata": {"name": "gw", "namespace": "edge"}}))
            .values(BTreeMap::from([("replicas".to_string(), json!(2))]))
            .build()
            .unwrap()
    }

    const SERVICE: &str = r#"apiVersion: v1
kind: Service
metadata:
  name: {{ Gateway.metadata.name }}-lb
spec:
  type: LoadBalancer
"#;

    #[test]
    fn empty_set_is_fatal() {
        let err = TemplateCompiler::default()
            .compile(&BTreeMap::new())
            .unwrap_err();
        assert!(matches!(err, TemplateError::EmptyTemplateSet));
    }

    #[test]
    fn all_broken_is_fatal() {
        let err = TemplateCompiler::default()
            .compile(&templates(&[("a", "{% if %}"), ("b", "{{ unclosed")]))
            .unwrap_err();
        assert!(matches!(err, TemplateError::NoCompilableTemplates { count: 2 }));
    }

    #[test]
    fn syntax_error_is_isolated_to_its_template() {
        let set = TemplateCompiler::default()
            .compile(&templates(&[("broken", "{% for %}"), ("svc", SERVICE)]))
            .unwrap();

        assert_eq!(set.len(), 2);
        assert!(set.record("broken").unwrap().compile_error().is_some());
        assert!(set.record("svc").unwrap().compile_error().is_none());

        let err = set.render("broken", &values()).unwrap_err();
        assert!(matches!(err, TemplateError::Syntax { .. }));
        assert!(set.render("svc", &values()).is_ok());
    }

    #[test]
    fn records_are_ordered_by_name() {
        let set = TemplateCompiler::default()
            .compile(&templates(&[("b", SERVICE), ("a", SERVICE), ("c", SERVICE)]))
            .unwrap();
        let names: Vec<_> = set.records().iter().map(|r| r.name()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn render_produces_document() {
        let set = TemplateCompiler::default()
            .compile(&templates(&[("svc", SERVICE)]))
            .unwrap();
        let doc = set.render("svc", &values()).unwrap();
        assert_eq!(doc["kind"], "Service");
        assert_eq!(doc["metadata"]["name"], "gw-lb");
    }

    #[test]
    fn undefined_field_is_an_error() {
        let set = TemplateCompiler::default()
            .compile(&templates(&[(
                "typo",
                "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: {{ Gateway.metadata.nmae }}\n",
            )]))
            .unwrap();
        let err = set.render("typo", &values()).unwrap_err();
        assert!(matches!(err, TemplateError::Render { .. }));
    }

    #[test]
    fn missing_sibling_is_an_error() {
        let set = TemplateCompiler::default()
            .compile(&templates(&[(
                "cert",
                "kind: X\nip: {{ Resources.svc.status.loadBalancer }}\n",
            )]))
            .unwrap();
        assert!(set.render("cert", &values()).is_err());
    }

    #[test]
    fn non_mapping_output_is_invalid_document() {
        let set = TemplateCompiler::default()
            .compile(&templates(&[("list", "- a\n- b\n"), ("blank", "{% if false %}x: 1{% endif %}")]))
            .unwrap();
        assert!(matches!(
            set.render("list", &values()),
            Err(TemplateError::InvalidDocument { .. })
        ));
        assert!(matches!(
            set.render("blank", &values()),
            Err(TemplateError::InvalidDocument { .. })
        ));
    }

    #[test]
    fn control_flow_and_values() {
        let source = r#"apiVersion: v1
kind: ConfigMap
metadata:
  name: hosts
data:
{% for i in range(Values.replicas) %}
  replica{{ i }}: "{{ i }}"
{% endfor %}
"#;
        let set = TemplateCompiler::default()
            .compile(&templates(&[("cm", source)]))
            .unwrap();
        let doc = set.render("cm", &values()).unwrap();
        assert_eq!(doc["data"]["replica0"], "0");
        assert_eq!(doc["data"]["replica1"], "1");
    }

    #[test]
    fn unknown_template_name() {
        let set = TemplateCompiler::default()
            .compile(&templates(&[("svc", SERVICE)]))
            .unwrap();
        assert!(set.render("nope", &values()).is_err());
    }
}
