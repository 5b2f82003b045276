//! `${VAR}` substitution and JSON path lookup
//!
//! Later steps refer to resources created by earlier ones (a payment UUID
//! returned on creation, then submitted by id), so values captured from
//! responses are fed back into subsequent URLs and bodies.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::common::{Error, Result};

use super::config::is_variable_name;

/// Variables visible to the steps of one run
#[derive(Debug, Clone, Default)]
pub struct Vars {
    values: BTreeMap<String, String>,
}

impl Vars {
    pub fn new(initial: BTreeMap<String, String>) -> Self {
        Self { values: initial }
    }

    pub fn set(&mut self, name: &str, value: String) {
        self.values.insert(name.to_string(), value);
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// Replace every `${NAME}` in `input`; `$$` yields a literal `$`
    pub fn substitute(&self, input: &str) -> Result<String> {
        let mut out = String::with_capacity(input.len());
        let mut rest = input;

        while let Some(pos) = rest.find('$') {
            out.push_str(&rest[..pos]);
            let tail = &rest[pos..];

            if tail.starts_with("$$") {
                out.push('$');
                rest = &tail[2..];
            } else if let Some(body) = tail.strip_prefix("${") {
                let end = body
                    .find('}')
                    .ok_or_else(|| Error::Config(format!("unterminated variable in '{}'", input)))?;
                let name = &body[..end];
                if !is_variable_name(name) {
                    return Err(Error::Config(format!("invalid variable name '{}'", name)));
                }
                let value = self
                    .get(name)
                    .ok_or_else(|| Error::UnknownVariable(name.to_string()))?;
                out.push_str(value);
                rest = &body[end + 1..];
            } else {
                out.push('$');
                rest = &tail[1..];
            }
        }

        out.push_str(rest);
        Ok(out)
    }

    /// Substitute inside every string of a JSON document, keys excluded
    pub fn substitute_json(&self, value: &Value) -> Result<Value> {
        Ok(match value {
            Value::String(s) => Value::String(self.substitute(s)?),
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| self.substitute_json(item))
                    .collect::<Result<_>>()?,
            ),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| Ok((k.clone(), self.substitute_json(v)?)))
                    .collect::<Result<_>>()?,
            ),
            other => other.clone(),
        })
    }
}

/// Resolve a dotted path such as `bankConnections.0.name`
///
/// An empty path refers to the whole document.
pub fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(value);
    }
    path.split('.').try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Render a captured value for substitution: strings verbatim, everything
/// else as JSON
pub fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars() -> Vars {
        let mut vars = Vars::default();
        vars.set("ACCOUNT", "savings".into());
        vars.set("UUID", "1234-abcd".into());
        vars
    }

    #[test]
    fn test_substitute_url() {
        let url = vars()
            .substitute("http://localhost:5001/bank-accounts/${ACCOUNT}/payment-initiations/${UUID}/submit")
            .unwrap();
        assert_eq!(
            url,
            "http://localhost:5001/bank-accounts/savings/payment-initiations/1234-abcd/submit"
        );
    }

    #[test]
    fn test_substitute_leaves_plain_dollars() {
        assert_eq!(vars().substitute("EUR:1 $5 $$${ACCOUNT}").unwrap(), "EUR:1 $5 $savings");
    }

    #[test]
    fn test_unknown_variable() {
        let err = vars().substitute("/accounts/${NOPE}").unwrap_err();
        assert!(matches!(err, Error::UnknownVariable(ref name) if name == "NOPE"));
    }

    #[test]
    fn test_unterminated_variable() {
        assert!(vars().substitute("/accounts/${ACCOUNT").is_err());
    }

    #[test]
    fn test_substitute_json_strings_only() {
        let body = json!({
            "bankAccount": "${ACCOUNT}",
            "nested": [{"id": "${UUID}"}, 7, true],
            "${ACCOUNT}": null
        });
        let out = vars().substitute_json(&body).unwrap();
        assert_eq!(
            out,
            json!({
                "bankAccount": "savings",
                "nested": [{"id": "1234-abcd"}, 7, true],
                "${ACCOUNT}": null
            })
        );
    }

    #[test]
    fn test_lookup() {
        let doc = json!({
            "bankConnections": [{"name": "my-ebics-new", "type": "ebics"}],
            "uuid": "42"
        });
        assert_eq!(lookup(&doc, "uuid"), Some(&json!("42")));
        assert_eq!(lookup(&doc, "bankConnections.0.name"), Some(&json!("my-ebics-new")));
        assert_eq!(lookup(&doc, "bankConnections.1.name"), None);
        assert_eq!(lookup(&doc, "uuid.deeper"), None);
        assert_eq!(lookup(&doc, ""), Some(&doc));
    }

    #[test]
    fn test_render() {
        assert_eq!(render(&json!("abc")), "abc");
        assert_eq!(render(&json!(3)), "3");
        assert_eq!(render(&json!([1, 2])), "[1,2]");
    }
}
