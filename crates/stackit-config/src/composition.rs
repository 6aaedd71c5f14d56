//! Composition configuration parsing.
//!
//! ```kdl
//! composition "serverless-app" {
//!     tag "Application" "app-name"
//!     context "environment" "dev"
//! }
//!
//! stack "secrets-stack" {
//!     resource "GithubOauth" kind="secret" {
//!         secret_name "GithubOAuthToken"
//!         template "{}"
//!         generate_key "TOKEN"
//!     }
//!     export "GithubOAuthToken" "${GithubOauth.arn}"
//! }
//!
//! stack "pipeline-stack" {
//!     import "GithubSecret" "secrets-stack:GithubOAuthToken"
//!     resource "Pipeline" kind="pipeline" {
//!         pipeline_name "pipeline-for-app"
//!         stages "Source" "Build"
//!         oauth_secret "${GithubSecret.value}"
//!     }
//! }
//! ```

use crate::{ConfigError, ConfigResult};
use kdl::{KdlDocument, KdlNode, KdlValue};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use stackit_core::resource::{FieldType, ResourceDeclaration, ResourceKind};
use stackit_core::stack::{ExportExpr, StackSpec};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

/// Context key whose value becomes the `Environment` tag.
pub const ENVIRONMENT_CONTEXT: &str = "environment";
/// Tag stamped on every resource.
pub const ENVIRONMENT_TAG: &str = "Environment";

const ENVIRONMENT_NOT_SET: &str = "not-set";

/// A parsed composition file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompositionConfig {
    pub name: String,
    /// Tags applied to every resource.
    pub tags: BTreeMap<String, String>,
    /// Free-form values, overridable from the command line.
    pub context: BTreeMap<String, String>,
    pub stacks: Vec<StackSpec>,
}

impl CompositionConfig {
    pub fn set_context(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.context.insert(key.into(), value.into());
    }

    /// Declared tags plus the `Environment` tag.
    ///
    /// The `environment` context value wins over a declared tag; with
    /// neither, the tag is `not-set`.
    pub fn effective_tags(&self) -> BTreeMap<String, String> {
        let mut tags = self.tags.clone();
        let environment = self
            .context
            .get(ENVIRONMENT_CONTEXT)
            .or_else(|| self.tags.get(ENVIRONMENT_TAG))
            .cloned()
            .unwrap_or_else(|| ENVIRONMENT_NOT_SET.to_string());
        tags.insert(ENVIRONMENT_TAG.to_string(), environment);
        tags
    }

    pub fn stack(&self, name: &str) -> Option<&StackSpec> {
        self.stacks.iter().find(|s| s.name == name)
    }
}

/// Read and parse a composition file.
pub fn load_composition(path: impl AsRef<Path>) -> ConfigResult<CompositionConfig> {
    let content = std::fs::read_to_string(path)?;
    parse_composition(&content)
}

/// Parse a composition from KDL text.
pub fn parse_composition(kdl: &str) -> ConfigResult<CompositionConfig> {
    let doc: KdlDocument = kdl.parse()?;

    let mut config = CompositionConfig {
        name: "default".to_string(),
        ..Default::default()
    };
    let mut stack_names = HashSet::new();

    for node in doc.nodes() {
        match node.name().value() {
            "composition" => parse_composition_node(node, &mut config)?,
            "stack" => {
                let stack = parse_stack(node)?;
                if !stack_names.insert(stack.name.clone()) {
                    return Err(ConfigError::Duplicate(format!("stack '{}'", stack.name)));
                }
                config.stacks.push(stack);
            }
            "tag" => {
                let (key, value) = parse_pair(node, "tag")?;
                config.tags.insert(key, value);
            }
            _ => {} // Ignore unknown nodes
        }
    }

    Ok(config)
}

/// Parse a `key=value` context override.
pub fn parse_context_arg(arg: &str) -> ConfigResult<(String, String)> {
    match arg.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(ConfigError::InvalidValue {
            field: "context".to_string(),
            message: format!("expected key=value, got '{arg}'"),
        }),
    }
}

fn parse_composition_node(node: &KdlNode, config: &mut CompositionConfig) -> ConfigResult<()> {
    if let Some(name) = get_first_string_arg(node) {
        config.name = name;
    }

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "tag" => {
                    let (key, value) = parse_pair(child, "tag")?;
                    config.tags.insert(key, value);
                }
                "context" => {
                    let (key, value) = parse_pair(child, "context")?;
                    config.context.insert(key, value);
                }
                _ => {}
            }
        }
    }

    Ok(())
}

fn parse_stack(node: &KdlNode) -> ConfigResult<StackSpec> {
    let name = get_first_string_arg(node)
        .ok_or_else(|| ConfigError::MissingField("stack name".to_string()))?;

    let mut stack = StackSpec::new(name);
    stack.region = get_string_prop(node, "region");

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "resource" => {
                    let resource = parse_resource(child, &stack.name)?;
                    stack.resources.push(resource);
                }
                "import" => {
                    let args = get_all_string_args(child);
                    let [logical_id, reference] = args.as_slice() else {
                        return Err(ConfigError::InvalidValue {
                            field: format!("import in stack '{}'", stack.name),
                            message: "expected: import \"LogicalId\" \"stack:Export\"".to_string(),
                        });
                    };
                    stack
                        .resources
                        .push(ResourceDeclaration::import(logical_id, reference.as_str()));
                }
                "export" => {
                    let (export_name, value) = parse_export(child, &stack.name)?;
                    stack = stack.export(export_name, value);
                }
                _ => {}
            }
        }
    }

    Ok(stack)
}

fn parse_resource(node: &KdlNode, stack: &str) -> ConfigResult<ResourceDeclaration> {
    let logical_id = get_first_string_arg(node)
        .ok_or_else(|| ConfigError::MissingField(format!("resource name in stack '{stack}'")))?;

    let kind_str = get_string_prop(node, "kind").ok_or_else(|| {
        ConfigError::MissingField(format!("kind for resource '{logical_id}' in stack '{stack}'"))
    })?;
    let kind: ResourceKind = kind_str.parse().map_err(|message| ConfigError::InvalidValue {
        field: format!("kind of resource '{logical_id}'"),
        message,
    })?;

    let mut resource = ResourceDeclaration::new(logical_id, kind);
    resource.depends_on = get_string_list_prop(node, "depends_on");
    resource.configuration = parse_configuration(node, kind);

    Ok(resource)
}

/// Collect a resource's child nodes into a JSON configuration map.
fn parse_configuration(node: &KdlNode, kind: ResourceKind) -> Map<String, Value> {
    let mut configuration = Map::new();
    let Some(children) = node.children() else {
        return configuration;
    };

    for child in children.nodes() {
        let key = child.name().value();
        if key == "depends_on" {
            continue;
        }

        let value = match child.children() {
            Some(grandchildren) => {
                let mut map = Map::new();
                for gc in grandchildren.nodes() {
                    if let Some(arg) = first_arg(gc) {
                        map.insert(gc.name().value().to_string(), kdl_to_json(arg));
                    }
                }
                Value::Object(map)
            }
            None => {
                let mut args: Vec<Value> = child
                    .entries()
                    .iter()
                    .filter(|e| e.name().is_none())
                    .map(|e| kdl_to_json(e.value()))
                    .collect();
                let is_list = kind
                    .shape()
                    .iter()
                    .any(|field| field.name == key && field.ty == FieldType::StringList);
                if args.len() == 1 && !is_list {
                    args.remove(0)
                } else {
                    Value::Array(args)
                }
            }
        };

        configuration.insert(key.to_string(), value);
    }

    configuration
}

fn parse_export(node: &KdlNode, stack: &str) -> ConfigResult<(String, ExportExpr)> {
    let args = get_all_string_args(node);
    let name = args
        .first()
        .cloned()
        .ok_or_else(|| ConfigError::MissingField(format!("export name in stack '{stack}'")))?;

    if let Some(template) = args.get(1) {
        return Ok((name, ExportExpr::template(template.as_str())));
    }

    let sum = node
        .children()
        .and_then(|children| children.nodes().iter().find(|c| c.name().value() == "sum"));
    match sum {
        Some(sum) => {
            let operands = sum
                .entries()
                .iter()
                .filter(|e| e.name().is_none())
                .map(|e| ExportExpr::template(kdl_to_text(e.value())))
                .collect();
            Ok((name, ExportExpr::Sum(operands)))
        }
        None => Err(ConfigError::MissingField(format!(
            "value for export '{name}' in stack '{stack}'"
        ))),
    }
}

fn parse_pair(node: &KdlNode, what: &str) -> ConfigResult<(String, String)> {
    let args: Vec<String> = node
        .entries()
        .iter()
        .filter(|e| e.name().is_none())
        .map(|e| kdl_to_text(e.value()))
        .collect();
    match args.as_slice() {
        [key, value] => Ok((key.clone(), value.clone())),
        _ => Err(ConfigError::InvalidValue {
            field: what.to_string(),
            message: format!("expected: {what} \"key\" \"value\""),
        }),
    }
}

// Helper functions for extracting values from KDL nodes

fn first_arg(node: &KdlNode) -> Option<&KdlValue> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .map(|e| e.value())
}

fn get_first_string_arg(node: &KdlNode) -> Option<String> {
    first_arg(node)
        .and_then(|v| v.as_string())
        .map(|s| s.to_string())
}

fn get_all_string_args(node: &KdlNode) -> Vec<String> {
    node.entries()
        .iter()
        .filter(|e| e.name().is_none())
        .filter_map(|e| e.value().as_string())
        .map(|s| s.to_string())
        .collect()
}

fn get_string_prop(node: &KdlNode, name: &str) -> Option<String> {
    node.get(name)
        .and_then(|v| v.as_string())
        .map(|s| s.to_string())
}

fn get_string_list_prop(node: &KdlNode, name: &str) -> Vec<String> {
    let mut result = Vec::new();

    // Repeated properties: depends_on="a" depends_on="b"
    for entry in node.entries() {
        if let Some(entry_name) = entry.name() {
            if entry_name.value() == name {
                if let Some(s) = entry.value().as_string() {
                    result.push(s.to_string());
                }
            }
        }
    }

    if !result.is_empty() {
        return result;
    }

    // Block syntax: depends_on "a" "b"
    if let Some(children) = node.children() {
        for child in children.nodes() {
            if child.name().value() == name {
                return get_all_string_args(child);
            }
        }
    }

    Vec::new()
}

fn kdl_to_json(value: &KdlValue) -> Value {
    if let Some(s) = value.as_string() {
        Value::String(s.to_string())
    } else if let Some(b) = value.as_bool() {
        Value::Bool(b)
    } else if let Some(i) = value.as_integer() {
        i64::try_from(i)
            .map(Value::from)
            .unwrap_or_else(|_| Value::String(i.to_string()))
    } else if let Some(f) = value.as_float() {
        serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    } else {
        Value::Null
    }
}

fn kdl_to_text(value: &KdlValue) -> String {
    match kdl_to_json(value) {
        Value::String(s) => s,
        other => other.to_string(),
    }
}
