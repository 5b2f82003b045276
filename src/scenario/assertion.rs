//! Response assertions

use serde_json::Value;

use crate::common::{Error, Result};

use super::config::BodyAssertion;
use super::http::HttpResponse;
use super::template::lookup;

/// Accept the response iff its status equals `expected`
pub fn check(response: &HttpResponse, expected: u16) -> Result<()> {
    if response.status == expected {
        Ok(())
    } else {
        Err(Error::UnexpectedStatus {
            url: response.url.clone(),
            status: response.status,
            expected,
        })
    }
}

/// Evaluate every body assertion against the parsed response
pub fn check_body(response: &HttpResponse, asserts: &[BodyAssertion]) -> Result<()> {
    if asserts.is_empty() {
        return Ok(());
    }
    let document = response.json()?;
    for assertion in asserts {
        check_one(&document, assertion).map_err(|message| Error::body_assertion(&response.url, message))?;
    }
    Ok(())
}

fn check_one(document: &Value, assertion: &BodyAssertion) -> std::result::Result<(), String> {
    let path = assertion.path.as_str();
    let found = lookup(document, path);

    if let Some(should_exist) = assertion.exists {
        if should_exist != found.is_some() {
            return Err(if should_exist {
                format!("'{}' is missing", path)
            } else {
                format!("'{}' should not be present", path)
            });
        }
    }

    let needs_value = assertion.equals.is_some()
        || assertion.len.is_some()
        || assertion.contains.is_some()
        || assertion.not_contains.is_some();
    let value = match found {
        Some(value) => value,
        None if needs_value => return Err(format!("'{}' is missing", path)),
        None => return Ok(()),
    };

    if let Some(expected) = &assertion.equals {
        if value != expected {
            return Err(format!("expected '{}' to equal {}, got {}", path, expected, value));
        }
    }

    if let Some(expected) = assertion.len {
        let actual = match value {
            Value::Array(items) => items.len(),
            Value::Object(map) => map.len(),
            Value::String(s) => s.chars().count(),
            other => return Err(format!("'{}' has no length: {}", path, other)),
        };
        if actual != expected {
            return Err(format!("expected '{}' to have length {}, got {}", path, expected, actual));
        }
    }

    if let Some(pattern) = &assertion.contains {
        if !any_element_matches(value, pattern, path)? {
            return Err(format!("'{}' has no element matching {}", path, pattern));
        }
    }

    if let Some(pattern) = &assertion.not_contains {
        if any_element_matches(value, pattern, path)? {
            return Err(format!("'{}' unexpectedly has an element matching {}", path, pattern));
        }
    }

    Ok(())
}

fn any_element_matches(value: &Value, pattern: &Value, path: &str) -> std::result::Result<bool, String> {
    match value {
        Value::Array(items) => Ok(items.iter().any(|item| matches_pattern(item, pattern))),
        other => Err(format!("'{}' is not an array: {}", path, other)),
    }
}

/// Objects match when every field of the pattern matches, other values
/// must be equal
fn matches_pattern(value: &Value, pattern: &Value) -> bool {
    match (value, pattern) {
        (Value::Object(actual), Value::Object(wanted)) => wanted
            .iter()
            .all(|(key, want)| actual.get(key).is_some_and(|have| matches_pattern(have, want))),
        _ => value == pattern,
    }
}
