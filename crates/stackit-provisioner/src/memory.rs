//! In-memory provisioner.
//!
//! Produces ARN-shaped handles without talking to any cloud API. Used by
//! `stackit synth` and by tests, which can inject failures per resource.

use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

use stackit_core::provisioner::{
    MaterializeRequest, Provisioner, ProvisioningError, ResourceHandle,
};
use stackit_core::resource::ResourceKind;

const PROVIDER: &str = "in-memory";

/// A resource created by [`InMemoryProvisioner`].
#[derive(Debug, Clone, Serialize)]
pub struct ProvisionedResource {
    pub stack: String,
    pub logical_id: String,
    pub region: String,
    pub handle: ResourceHandle,
    pub tags: BTreeMap<String, String>,
}

/// Provisioner that keeps every resource in memory.
#[derive(Debug, Clone)]
pub struct InMemoryProvisioner {
    account_id: String,
    default_region: String,
    requests: Vec<MaterializeRequest>,
    resources: Vec<ProvisionedResource>,
    failures: HashMap<String, String>,
}

impl InMemoryProvisioner {
    pub fn new(account_id: impl Into<String>, default_region: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            default_region: default_region.into(),
            requests: Vec::new(),
            resources: Vec::new(),
            failures: HashMap::new(),
        }
    }

    /// Fail any request for `logical_id` with `message`.
    pub fn fail_on(mut self, logical_id: impl Into<String>, message: impl Into<String>) -> Self {
        self.failures.insert(logical_id.into(), message.into());
        self
    }

    /// Every request received, including failed ones, in call order.
    pub fn requests(&self) -> &[MaterializeRequest] {
        &self.requests
    }

    /// Successfully created resources, in creation order.
    pub fn resources(&self) -> &[ProvisionedResource] {
        &self.resources
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    fn handle_for(
        &self,
        request: &MaterializeRequest,
        region: &str,
    ) -> Result<ResourceHandle, ProvisioningError> {
        let account = &self.account_id;
        let mut handle = ResourceHandle::new(request.kind);
        let suffix = handle.id.suffix();
        let config_str = |key: &str| request.configuration.get(key).and_then(Value::as_str);
        let name_or_id = |key: &str| {
            config_str(key)
                .unwrap_or(request.logical_id.as_str())
                .to_string()
        };

        handle = match request.kind {
            ResourceKind::Secret => {
                let name = name_or_id("secret_name");
                let arn = format!(
                    "arn:aws:secretsmanager:{region}:{account}:secret:{name}-{}",
                    &suffix[..6]
                );
                handle.with_attribute("arn", arn).with_attribute("name", name)
            }
            ResourceKind::Bucket => {
                let name = config_str("bucket_name")
                    .map(str::to_string)
                    .unwrap_or_else(|| {
                        generated_name(&request.stack, &request.logical_id, &suffix)
                    });
                handle
                    .with_attribute("arn", format!("arn:aws:s3:::{name}"))
                    .with_attribute("domain_name", format!("{name}.s3.amazonaws.com"))
                    .with_attribute("name", name)
            }
            ResourceKind::BuildProject => {
                let name = name_or_id("project_name");
                let arn = format!("arn:aws:codebuild:{region}:{account}:project/{name}");
                handle.with_attribute("arn", arn).with_attribute("name", name)
            }
            ResourceKind::Pipeline => {
                let name = name_or_id("pipeline_name");
                let arn = format!("arn:aws:codepipeline:{region}:{account}:{name}");
                handle.with_attribute("arn", arn).with_attribute("name", name)
            }
            ResourceKind::WebAcl => {
                let scope = config_str("scope").unwrap_or("REGIONAL");
                if scope == "CLOUDFRONT" && region != "us-east-1" {
                    return Err(ProvisioningError::new(
                        PROVIDER,
                        format!(
                            "CLOUDFRONT web ACL '{}' must be in us-east-1, not {region}",
                            request.logical_id
                        ),
                    ));
                }
                let name = name_or_id("metric_name");
                let id = handle.id.to_string();
                let path = if scope == "CLOUDFRONT" { "global" } else { "regional" };
                let arn = format!("arn:aws:wafv2:{region}:{account}:{path}/webacl/{name}/{id}");
                handle
                    .with_attribute("arn", arn)
                    .with_attribute("id", id)
                    .with_attribute("name", name)
            }
            ResourceKind::OriginAccessIdentity => {
                let id = format!("E{}", suffix.to_uppercase());
                handle
                    .with_attribute("canonical_user_id", suffix.repeat(2))
                    .with_attribute("id", id)
            }
            ResourceKind::Certificate => {
                let arn = config_str("certificate_arn").unwrap_or_default().to_string();
                handle.with_attribute("arn", arn)
            }
            ResourceKind::Distribution => {
                let id = format!("E{}", suffix.to_uppercase());
                handle
                    .with_attribute(
                        "arn",
                        format!("arn:aws:cloudfront::{account}:distribution/{id}"),
                    )
                    .with_attribute("domain_name", format!("d{suffix}.cloudfront.net"))
                    .with_attribute("id", id)
            }
            ResourceKind::Import => {
                return Err(ProvisioningError::new(
                    PROVIDER,
                    format!(
                        "import '{}' is resolved from the export registry, not provisioned",
                        request.logical_id
                    ),
                ));
            }
        };

        Ok(handle)
    }
}

impl Default for InMemoryProvisioner {
    fn default() -> Self {
        Self::new("123456789012", "us-east-1")
    }
}

impl Provisioner for InMemoryProvisioner {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    fn materialize(
        &mut self,
        request: &MaterializeRequest,
    ) -> Result<ResourceHandle, ProvisioningError> {
        self.requests.push(request.clone());

        if let Some(message) = self.failures.get(&request.logical_id) {
            return Err(ProvisioningError::new(PROVIDER, message.clone()));
        }

        let region = request
            .region
            .clone()
            .unwrap_or_else(|| self.default_region.clone());
        let handle = self.handle_for(request, &region)?;

        debug!(
            stack = %request.stack,
            resource = %request.logical_id,
            kind = %request.kind,
            %region,
            "Provisioned resource"
        );

        self.resources.push(ProvisionedResource {
            stack: request.stack.clone(),
            logical_id: request.logical_id.clone(),
            region,
            handle: handle.clone(),
            tags: request.tags.clone(),
        });

        Ok(handle)
    }
}

/// CDK-style physical name: `stack-logicalid-suffix`, lowercased.
fn generated_name(stack: &str, logical_id: &str, suffix: &str) -> String {
    format!("{stack}-{logical_id}-{suffix}").to_lowercase()
}
