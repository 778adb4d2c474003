//! Variable interpolation over the raw document.
//!
//! `{name}` tokens in string scalars are substituted from the document's
//! declared `variables` mapping plus the system-provided `tmp_dir`. This is a
//! pure preprocessing step: it runs before validation, only touches declared
//! names (unknown `{...}` spans are left alone so regex quantifiers like
//! `{2,3}` survive), and is idempotent under identity bindings.

use std::path::Path;

use serde_yaml::Value;

use crate::error::FieldIssue;

/// Apply variable interpolation to a parsed screenplay document.
///
/// The `variables` mapping itself is not interpolated, so a binding cannot
/// reference another binding - bindings are plain values, not templates.
pub fn interpolate(doc: &Value, tmp_dir: &Path) -> Result<Value, Vec<FieldIssue>> {
    let mut bindings: Vec<(String, String)> = Vec::new();

    if let Some(mapping) = doc.as_mapping() {
        if let Some(vars) = mapping.get("variables") {
            let Some(vars) = vars.as_mapping() else {
                return Err(vec![FieldIssue::new(
                    "variables",
                    "must be a mapping of name to string value",
                )]);
            };
            for (key, value) in vars {
                let (Some(name), Some(value)) = (key.as_str(), scalar_to_string(value)) else {
                    return Err(vec![FieldIssue::new(
                        "variables",
                        "names and values must be strings",
                    )]);
                };
                bindings.push((name.to_string(), value));
            }
        }
    }

    bindings.push(("tmp_dir".to_string(), tmp_dir.display().to_string()));

    Ok(substitute(doc, &bindings, true))
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn substitute(value: &Value, bindings: &[(String, String)], top_level: bool) -> Value {
    match value {
        Value::String(s) => Value::String(substitute_str(s, bindings)),
        Value::Sequence(seq) => Value::Sequence(
            seq.iter()
                .map(|v| substitute(v, bindings, false))
                .collect(),
        ),
        Value::Mapping(map) => {
            let mut out = serde_yaml::Mapping::new();
            for (k, v) in map {
                // Leave the variables mapping untouched
                if top_level && k.as_str() == Some("variables") {
                    out.insert(k.clone(), v.clone());
                } else {
                    out.insert(k.clone(), substitute(v, bindings, false));
                }
            }
            Value::Mapping(out)
        }
        other => other.clone(),
    }
}

fn substitute_str(s: &str, bindings: &[(String, String)]) -> String {
    let mut out = s.to_string();
    for (name, value) in bindings {
        let token = format!("{{{name}}}");
        if out.contains(&token) {
            out = out.replace(&token, value);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(source: &str) -> Value {
        serde_yaml::from_str(source).unwrap()
    }

    #[test]
    fn test_substitutes_declared_variables() {
        let doc = doc(r#"
variables:
  name: world
scenarios:
  - label: demo
    actions:
      - command: "echo hello {name}"
"#);
        let result = interpolate(&doc, Path::new("/tmp/run")).unwrap();
        let rendered = serde_yaml::to_string(&result).unwrap();
        assert!(rendered.contains("echo hello world"));
    }

    #[test]
    fn test_tmp_dir_is_always_bound() {
        let doc = doc(r#"
scenarios:
  - label: demo
    actions:
      - command: "touch {tmp_dir}/marker"
"#);
        let result = interpolate(&doc, Path::new("/tmp/run-x")).unwrap();
        let rendered = serde_yaml::to_string(&result).unwrap();
        assert!(rendered.contains("/tmp/run-x/marker"));
    }

    #[test]
    fn test_unknown_tokens_left_alone() {
        let doc = doc(r#"
scenarios:
  - label: demo
    actions:
      - wait_screen_regex: "ab{2,3}c"
"#);
        let result = interpolate(&doc, Path::new("/tmp")).unwrap();
        let rendered = serde_yaml::to_string(&result).unwrap();
        assert!(rendered.contains("ab{2,3}c"));
    }

    #[test]
    fn test_variables_mapping_not_rewritten() {
        let doc = doc(r#"
variables:
  a: "{b}"
  b: value
"#);
        let result = interpolate(&doc, Path::new("/tmp")).unwrap();
        let vars = result.get("variables").unwrap();
        assert_eq!(vars.get("a").unwrap().as_str(), Some("{b}"));
    }

    #[test]
    fn test_idempotent_under_identity_bindings() {
        let source = r#"
variables:
  name: "{name}"
scenarios:
  - label: demo
    actions:
      - command: "echo {name}"
"#;
        let parsed = doc(source);
        let once = interpolate(&parsed, Path::new("/tmp")).unwrap();
        let twice = interpolate(&once, Path::new("/tmp")).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_non_string_variable_values_coerced() {
        let doc = doc(r#"
variables:
  port: 8080
scenarios:
  - label: demo
    actions:
      - command: "curl localhost:{port}"
"#);
        let result = interpolate(&doc, Path::new("/tmp")).unwrap();
        let rendered = serde_yaml::to_string(&result).unwrap();
        assert!(rendered.contains("localhost:8080"));
    }

    #[test]
    fn test_variables_must_be_mapping() {
        let doc = doc("variables: [a, b]\n");
        let err = interpolate(&doc, Path::new("/tmp")).unwrap_err();
        assert_eq!(err[0].field_path, "variables");
    }
}
