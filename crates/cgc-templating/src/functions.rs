//! Template function library
//!
//! Every helper is registered twice: as a global function and as a filter.
//! Filters receive the piped value as the *last* argument, so
//! `{{ x | nindent(4) }}` and `{{ nindent(4, x) }}` are the same call.
//!
//! The registry is built once and shared read-only between compilers.

use base64::{engine::general_purpose::STANDARD, Engine};
use minijinja::value::Rest;
use minijinja::{Environment, Error, ErrorKind, State, Value};

/// Immutable set of helpers bound into every compiled template set
#[derive(Debug, Clone, Default)]
pub struct FunctionRegistry {
    entries: Vec<(&'static str, Value)>,
}

impl FunctionRegistry {
    /// Registry with no helpers beyond minijinja's builtins
    pub fn empty() -> Self {
        Self::default()
    }

    /// The standard helper library
    pub fn standard() -> Self {
        Self::empty()
            .with("toYaml", Value::from_function(to_yaml))
            .with("b64enc", Value::from_function(b64enc))
            .with("b64dec", Value::from_function(b64dec))
            .with("quote", Value::from_function(quote))
            .with("squote", Value::from_function(squote))
            .with("trimPrefix", Value::from_function(trim_prefix))
            .with("trimSuffix", Value::from_function(trim_suffix))
            .with("nindent", Value::from_function(nindent))
            .with("required", Value::from_function(required))
            .with("default", Value::from_function(default))
    }

    /// Add a helper. A later entry with the same name wins.
    pub fn with(mut self, name: &'static str, function: Value) -> Self {
        self.entries.retain(|(n, _)| *n != name);
        self.entries.push((name, function));
        self
    }

    /// Bind every helper into an environment as function and filter
    pub fn register(&self, env: &mut Environment<'static>) {
        for (name, function) in &self.entries {
            env.add_global(*name, function.clone());

            let function = function.clone();
            env.add_filter(
                *name,
                move |state: &State, value: Value, rest: Rest<Value>| -> Result<Value, Error> {
                    let mut args = rest.to_vec();
                    args.push(value);
                    function.call(state, &args)
                },
            );
        }
    }
}

/// Serialize a value to a YAML block. Never fails: errors render as "".
fn to_yaml(value: Value) -> String {
    cgc_common::yaml::to_yaml(&value).unwrap_or_default()
}

fn b64enc(value: &str) -> String {
    STANDARD.encode(value.as_bytes())
}

fn b64dec(value: &str) -> Result<String, Error> {
    let bytes = STANDARD.decode(value).map_err(|e| {
        Error::new(
            ErrorKind::InvalidOperation,
            format!("base64 decode error: {}", e),
        )
    })?;
    String::from_utf8(bytes).map_err(|e| {
        Error::new(
            ErrorKind::InvalidOperation,
            format!("base64 decode produced invalid UTF-8: {}", e),
        )
    })
}

/// Double-quote a value, escaping it so the result is a valid YAML scalar
fn quote(value: Value) -> String {
    if value.is_undefined() || value.is_none() {
        return String::new();
    }
    let text = value
        .as_str()
        .map(str::to_string)
        .unwrap_or_else(|| value.to_string());
    serde_json::to_string(&text).unwrap_or_default()
}

fn squote(value: Value) -> String {
    if value.is_undefined() || value.is_none() {
        return String::new();
    }
    let text = value
        .as_str()
        .map(str::to_string)
        .unwrap_or_else(|| value.to_string());
    format!("'{}'", text.replace('\'', "''"))
}

fn trim_prefix(prefix: &str, value: &str) -> String {
    value.strip_prefix(prefix).unwrap_or(value).to_string()
}

fn trim_suffix(suffix: &str, value: &str) -> String {
    value.strip_suffix(suffix).unwrap_or(value).to_string()
}

/// Newline followed by `value` with every line indented by `width` spaces
fn nindent(width: usize, value: &str) -> String {
    let pad = " ".repeat(width);
    let indented = value
        .split('\n')
        .map(|line| format!("{pad}{line}"))
        .collect::<Vec<_>>()
        .join("\n");
    format!("\n{indented}")
}

fn required(message: &str, value: Value) -> Result<Value, Error> {
    let empty = value.is_undefined()
        || value.is_none()
        || value.as_str().is_some_and(str::is_empty);
    if empty {
        Err(Error::new(ErrorKind::InvalidOperation, message.to_string()))
    } else {
        Ok(value)
    }
}

/// `value` unless it is empty (undefined, none, "", 0, false, empty collection)
fn default(fallback: Value, value: Option<Value>) -> Value {
    match value {
        Some(v) if v.is_true() => v,
        _ => fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use minijinja::context;

    fn env() -> Environment<'static> {
        let mut env = Environment::new();
        FunctionRegistry::standard().register(&mut env);
        env
    }

    fn render(source: &str, ctx: Value) -> Result<String, Error> {
        env().render_str(source, ctx)
    }

    #[test]
    fn to_yaml_as_filter_and_function() {
        let ctx = context! { spec => context! { port => 443, hosts => vec!["a.example.com"] } };
        let filtered = render("{{ spec | toYaml }}", ctx.clone()).unwrap();
        let called = render("{{ toYaml(spec) }}", ctx).unwrap();
        assert_eq!(filtered, called);
        assert!(filtered.contains("port: 443"));
        assert!(filtered.contains("- a.example.com"));
        assert!(!filtered.ends_with('\n'));
    }

    #[test]
    fn nindent_pipes_value_last() {
        let ctx = context! { body => "a: 1\nb: 2" };
        let out = render("x:{{ body | nindent(2) }}", ctx).unwrap();
        assert_eq!(out, "x:\n  a: 1\n  b: 2");
    }

    #[test]
    fn base64_helpers() {
        assert_eq!(render("{{ 'hello' | b64enc }}", context! {}).unwrap(), "aGVsbG8=");
        assert_eq!(render("{{ b64dec('aGVsbG8=') }}", context! {}).unwrap(), "hello");
        assert!(render("{{ 'not-valid!!' | b64dec }}", context! {}).is_err());
    }

    #[test]
    fn quoting_helpers() {
        assert_eq!(render("{{ 'a\"b' | quote }}", context! {}).unwrap(), r#""a\"b""#);
        assert_eq!(render("{{ 8080 | quote }}", context! {}).unwrap(), r#""8080""#);
        assert_eq!(render("{{ \"it's\" | squote }}", context! {}).unwrap(), "'it''s'");
    }

    #[test]
    fn trim_helpers() {
        let ctx = context! { host => "*.example.com" };
        assert_eq!(render("{{ host | trimPrefix('*.') }}", ctx.clone()).unwrap(), "example.com");
        assert_eq!(render("{{ trimSuffix('.com', host) }}", ctx).unwrap(), "*.example");
    }

    #[test]
    fn required_rejects_empty() {
        let err = render("{{ '' | required('issuer must be set') }}", context! {}).unwrap_err();
        assert!(err.to_string().contains("issuer must be set"));
        assert_eq!(render("{{ 'x' | required('msg') }}", context! {}).unwrap(), "x");
    }

    #[test]
    fn default_replaces_empty_values() {
        assert_eq!(render("{{ '' | default('fallback') }}", context! {}).unwrap(), "fallback");
        assert_eq!(render("{{ 'set' | default('fallback') }}", context! {}).unwrap(), "set");
        assert_eq!(render("{{ none | default(3) }}", context! {}).unwrap(), "3");
    }

    #[test]
    fn builtins_remain_available() {
        assert_eq!(render("{{ 'abc' | upper }}", context! {}).unwrap(), "ABC");
        assert_eq!(render("{{ ['a', 'b'] | join(',') }}", context! {}).unwrap(), "a,b");
    }

    #[test]
    fn later_registration_wins() {
        let registry = FunctionRegistry::standard()
            .with("quote", Value::from_function(|v: &str| format!("<{v}>")));
        let mut env = Environment::new();
        registry.register(&mut env);
        assert_eq!(env.render_str("{{ 'x' | quote }}", context! {}).unwrap(), "<x>");
        assert_eq!(registry.entries.iter().filter(|(n, _)| *n == "quote").count(), 1);
    }
}
