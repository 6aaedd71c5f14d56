//! Attribute templates inside configuration strings.
//!
//! A template slot has the form `${LogicalId.attribute}` and is replaced by
//! the named attribute of an already materialized resource in the same
//! stack, e.g. `web_acl_id "${Waf.arn}"`.

use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;
use thiserror::Error;

static ATTR_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_-]*)\.([A-Za-z_][A-Za-z0-9_]*)\}").unwrap()
});

// Anything that opens like a slot, well-formed or not
static SLOT_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\$\{[^}]*\}").unwrap());

static LOGICAL_ID_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_-]*$").unwrap());

/// Whether `id` can be addressed from a `${id.attribute}` slot.
pub fn is_valid_logical_id(id: &str) -> bool {
    LOGICAL_ID_REGEX.is_match(id)
}

/// A `${resource.attribute}` slot found in a string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeRef {
    pub resource: String,
    pub attribute: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("resource '{}' has no attribute '{}'", .0.resource, .0.attribute)]
    Missing(AttributeRef),

    #[error("malformed attribute reference '{0}', expected '${{LogicalId.attribute}}'")]
    Malformed(String),
}

/// `${...}` slots in a string that are not valid attribute references.
pub fn malformed_slots(input: &str) -> Vec<String> {
    SLOT_REGEX
        .find_iter(input)
        .map(|m| m.as_str())
        .filter(|slot| !ATTR_REGEX.find(slot).is_some_and(|m| m.as_str() == *slot))
        .map(str::to_string)
        .collect()
}

/// [`malformed_slots`] over every string inside a JSON value.
pub fn value_malformed_slots(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) => malformed_slots(s),
        Value::Array(items) => items.iter().flat_map(value_malformed_slots).collect(),
        Value::Object(map) => map.values().flat_map(value_malformed_slots).collect(),
        _ => Vec::new(),
    }
}

/// All attribute references in a string, in order of appearance.
pub fn references(input: &str) -> Vec<AttributeRef> {
    ATTR_REGEX
        .captures_iter(input)
        .map(|caps| AttributeRef {
            resource: caps[1].to_string(),
            attribute: caps[2].to_string(),
        })
        .collect()
}

/// All attribute references in a JSON value, walking arrays and objects.
pub fn value_references(value: &Value) -> Vec<AttributeRef> {
    match value {
        Value::String(s) => references(s),
        Value::Array(items) => items.iter().flat_map(value_references).collect(),
        Value::Object(map) => map.values().flat_map(value_references).collect(),
        _ => Vec::new(),
    }
}

/// Substitute every slot using `lookup`.
///
/// Fails on the first malformed slot, or on the first reference `lookup`
/// could not satisfy.
pub fn render<F>(input: &str, lookup: F) -> Result<String, TemplateError>
where
    F: Fn(&str, &str) -> Option<String>,
{
    if let Some(slot) = malformed_slots(input).into_iter().next() {
        return Err(TemplateError::Malformed(slot));
    }

    let mut missing = None;
    let rendered = ATTR_REGEX.replace_all(input, |caps: &regex::Captures| {
        match lookup(&caps[1], &caps[2]) {
            Some(value) => value,
            None => {
                if missing.is_none() {
                    missing = Some(AttributeRef {
                        resource: caps[1].to_string(),
                        attribute: caps[2].to_string(),
                    });
                }
                caps[0].to_string()
            }
        }
    });

    match missing {
        Some(reference) => Err(TemplateError::Missing(reference)),
        None => Ok(rendered.into_owned()),
    }
}

/// [`render`] applied to every string inside a JSON value.
pub fn render_value<F>(value: &Value, lookup: &F) -> Result<Value, TemplateError>
where
    F: Fn(&str, &str) -> Option<String>,
{
    Ok(match value {
        Value::String(s) => Value::String(render(s, lookup)?),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| render_value(item, lookup))
                .collect::<Result<_, _>>()?,
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| Ok((k.clone(), render_value(v, lookup)?)))
                .collect::<Result<_, TemplateError>>()?,
        ),
        other => other.clone(),
    })
}
