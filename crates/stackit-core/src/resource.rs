//! Resource declarations and per-kind configuration shapes.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::export::ExportKey;
use crate::template;
use crate::{Error, Result};

/// Type of a managed resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Secret,
    Bucket,
    BuildProject,
    Pipeline,
    WebAcl,
    OriginAccessIdentity,
    Certificate,
    Distribution,
    /// Cross-stack reference to another stack's export.
    Import,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 9] = [
        ResourceKind::Secret,
        ResourceKind::Bucket,
        ResourceKind::BuildProject,
        ResourceKind::Pipeline,
        ResourceKind::WebAcl,
        ResourceKind::OriginAccessIdentity,
        ResourceKind::Certificate,
        ResourceKind::Distribution,
        ResourceKind::Import,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Secret => "secret",
            ResourceKind::Bucket => "bucket",
            ResourceKind::BuildProject => "build_project",
            ResourceKind::Pipeline => "pipeline",
            ResourceKind::WebAcl => "web_acl",
            ResourceKind::OriginAccessIdentity => "origin_access_identity",
            ResourceKind::Certificate => "certificate",
            ResourceKind::Distribution => "distribution",
            ResourceKind::Import => "import",
        }
    }

    /// Configuration fields accepted by this kind.
    pub fn shape(&self) -> &'static [Field] {
        match self {
            ResourceKind::Secret => SECRET_SHAPE,
            ResourceKind::Bucket => BUCKET_SHAPE,
            ResourceKind::BuildProject => BUILD_PROJECT_SHAPE,
            ResourceKind::Pipeline => PIPELINE_SHAPE,
            ResourceKind::WebAcl => WEB_ACL_SHAPE,
            ResourceKind::OriginAccessIdentity => OAI_SHAPE,
            ResourceKind::Certificate => CERTIFICATE_SHAPE,
            ResourceKind::Distribution => DISTRIBUTION_SHAPE,
            ResourceKind::Import => IMPORT_SHAPE,
        }
    }
}

const SECRET_SHAPE: &[Field] = &[
    Field::required("secret_name", FieldType::String),
    Field::optional("template", FieldType::String),
    Field::optional("generate_key", FieldType::String),
    Field::optional("description", FieldType::String),
];

const BUCKET_SHAPE: &[Field] = &[
    Field::optional("bucket_name", FieldType::String),
    Field::optional("encryption", FieldType::String),
    Field::optional("block_public_access", FieldType::Bool),
    Field::optional("versioned", FieldType::Bool),
    Field::optional("removal_policy", FieldType::String),
    // Identities granted read access, e.g. "${OAI.id}"
    Field::optional("read_grants", FieldType::StringList),
];

const BUILD_PROJECT_SHAPE: &[Field] = &[
    Field::required("project_name", FieldType::String),
    Field::optional("build_image", FieldType::String),
    Field::optional("environment", FieldType::StringMap),
    Field::optional("cache_bucket", FieldType::String),
    Field::optional("policy_actions", FieldType::StringList),
    Field::optional("timeout_minutes", FieldType::Integer),
];

const PIPELINE_SHAPE: &[Field] = &[
    Field::required("pipeline_name", FieldType::String),
    Field::required("stages", FieldType::StringList),
    Field::optional("source_owner", FieldType::String),
    Field::optional("source_repo", FieldType::String),
    Field::optional("source_branch", FieldType::String),
    Field::optional("oauth_secret", FieldType::String),
    Field::optional("build_project", FieldType::String),
    Field::optional("artifact_bucket", FieldType::String),
];

const WEB_ACL_SHAPE: &[Field] = &[
    Field::required("scope", FieldType::String),
    Field::required("default_action", FieldType::String),
    Field::optional("metric_name", FieldType::String),
    Field::optional("managed_rules", FieldType::StringList),
];

const OAI_SHAPE: &[Field] = &[Field::optional("comment", FieldType::String)];

const CERTIFICATE_SHAPE: &[Field] = &[Field::required("certificate_arn", FieldType::String)];

const DISTRIBUTION_SHAPE: &[Field] = &[
    Field::required("origin_bucket", FieldType::String),
    Field::optional("origin_access_identity", FieldType::String),
    Field::optional("web_acl_id", FieldType::String),
    Field::optional("certificate_arn", FieldType::String),
    Field::optional("aliases", FieldType::StringList),
    Field::optional("security_policy", FieldType::String),
];

const IMPORT_SHAPE: &[Field] = &[Field::required("ref", FieldType::String)];

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        ResourceKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown resource kind: {s}"))
    }
}

/// Expected type of a configuration field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    String,
    Bool,
    Integer,
    StringList,
    StringMap,
}

impl FieldType {
    fn matches(&self, value: &Value) -> bool {
        match self {
            FieldType::String => value.is_string(),
            FieldType::Bool => value.is_boolean(),
            FieldType::Integer => value.is_i64() || value.is_u64(),
            FieldType::StringList => value
                .as_array()
                .is_some_and(|items| items.iter().all(Value::is_string)),
            FieldType::StringMap => value
                .as_object()
                .is_some_and(|map| map.values().all(Value::is_string)),
        }
    }

    fn describe(&self) -> &'static str {
        match self {
            FieldType::String => "a string",
            FieldType::Bool => "a boolean",
            FieldType::Integer => "an integer",
            FieldType::StringList => "a list of strings",
            FieldType::StringMap => "a map of strings",
        }
    }
}

/// One entry of a kind's configuration shape.
#[derive(Debug, Clone, Copy)]
pub struct Field {
    pub name: &'static str,
    pub ty: FieldType,
    pub required: bool,
}

impl Field {
    const fn required(name: &'static str, ty: FieldType) -> Self {
        Self {
            name,
            ty,
            required: true,
        }
    }

    const fn optional(name: &'static str, ty: FieldType) -> Self {
        Self {
            name,
            ty,
            required: false,
        }
    }
}

/// A resource as declared inside a stack, before materialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDeclaration {
    /// Name of the resource within its stack.
    pub logical_id: String,
    pub kind: ResourceKind,
    pub configuration: Map<String, Value>,
    /// Resources of the same stack, or other stacks, to create this after.
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl ResourceDeclaration {
    pub fn new(logical_id: impl Into<String>, kind: ResourceKind) -> Self {
        Self {
            logical_id: logical_id.into(),
            kind,
            configuration: Map::new(),
            depends_on: Vec::new(),
        }
    }

    /// Cross-stack reference declaration for `stack:export`.
    pub fn import(logical_id: impl Into<String>, reference: impl Into<String>) -> Self {
        Self::new(logical_id, ResourceKind::Import).with("ref", reference.into())
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.configuration.insert(key.to_string(), value.into());
        self
    }

    pub fn depends_on(mut self, target: impl Into<String>) -> Self {
        self.depends_on.push(target.into());
        self
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.configuration.get(key).and_then(Value::as_str)
    }

    /// Raw `ref` string of an import declaration.
    pub fn import_ref(&self) -> Option<&str> {
        match self.kind {
            ResourceKind::Import => self.get_str("ref"),
            _ => None,
        }
    }

    /// Export this declaration points at, when it is a well-formed import.
    pub fn import_key(&self) -> Option<ExportKey> {
        self.import_ref().and_then(|r| r.parse().ok())
    }

    /// Check the configuration against the kind's shape.
    pub fn validate(&self, stack: &str) -> Result<()> {
        let invalid =
            |message: String| Error::invalid_resource(stack, &self.logical_id, self.kind, message);

        if self.logical_id.trim().is_empty() {
            return Err(Error::invalid_stack(
                stack,
                format!("{} declared without a logical id", self.kind),
            ));
        }
        if !template::is_valid_logical_id(&self.logical_id) {
            return Err(invalid(format!(
                "logical id '{}' must match [A-Za-z_][A-Za-z0-9_-]*",
                self.logical_id
            )));
        }

        let shape = self.kind.shape();
        for key in self.configuration.keys() {
            if !shape.iter().any(|field| field.name == key) {
                return Err(invalid(format!("unknown field '{key}'")));
            }
        }

        for field in shape {
            match self.configuration.get(field.name) {
                None | Some(Value::Null) if field.required => {
                    return Err(invalid(format!("missing required field '{}'", field.name)));
                }
                None | Some(Value::Null) => {}
                Some(value) if !field.ty.matches(value) => {
                    return Err(invalid(format!(
                        "field '{}' must be {}",
                        field.name,
                        field.ty.describe()
                    )));
                }
                Some(_) => {}
            }
        }

        self.validate_kind_rules().map_err(invalid)
    }

    fn validate_kind_rules(&self) -> std::result::Result<(), String> {
        match self.kind {
            ResourceKind::Secret => {
                let template = self.get_str("template");
                let generate_key = self.get_str("generate_key");
                if let Some(template) = template {
                    let parsed: Value = serde_json::from_str(template)
                        .map_err(|e| format!("template is not valid JSON: {e}"))?;
                    if !parsed.is_object() {
                        return Err("template must be a JSON object".to_string());
                    }
                }
                if generate_key.is_some() && template.is_none() {
                    return Err("generate_key requires a template".to_string());
                }
                Ok(())
            }
            ResourceKind::Bucket => {
                one_of(self.get_str("encryption"), "encryption", &["s3_managed", "kms", "none"])?;
                one_of(self.get_str("removal_policy"), "removal_policy", &["retain", "destroy"])?;
                let blank_grant = self
                    .configuration
                    .get("read_grants")
                    .and_then(Value::as_array)
                    .is_some_and(|grants| {
                        grants
                            .iter()
                            .any(|v| v.as_str().is_none_or(|s| s.trim().is_empty()))
                    });
                if blank_grant {
                    return Err("read_grants entries must not be empty".to_string());
                }
                Ok(())
            }
            ResourceKind::Pipeline => {
                let empty = self
                    .configuration
                    .get("stages")
                    .and_then(Value::as_array)
                    .is_none_or(|stages| stages.is_empty());
                if empty {
                    return Err("pipeline needs at least one stage".to_string());
                }
                Ok(())
            }
            ResourceKind::WebAcl => {
                one_of(self.get_str("scope"), "scope", &["CLOUDFRONT", "REGIONAL"])?;
                one_of(self.get_str("default_action"), "default_action", &["allow", "block"])
            }
            ResourceKind::Distribution => one_of(
                self.get_str("security_policy"),
                "security_policy",
                &["TLSv1", "TLSv1.1_2016", "TLSv1.2_2021"],
            ),
            ResourceKind::Import => match self.get_str("ref") {
                Some(r) if r.trim().is_empty() => Err("ref must not be empty".to_string()),
                _ => Ok(()),
            },
            ResourceKind::BuildProject
            | ResourceKind::OriginAccessIdentity
            | ResourceKind::Certificate => Ok(()),
        }
    }
}

fn one_of(value: Option<&str>, field: &str, allowed: &[&str]) -> std::result::Result<(), String> {
    match value {
        Some(v) if !allowed.contains(&v) => Err(format!(
            "field '{field}' must be one of {}, got '{v}'",
            allowed.join(", ")
        )),
        _ => Ok(()),
    }
}
