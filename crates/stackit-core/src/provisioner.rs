//! Provisioner trait and materialization types.
//!
//! A provisioner turns a validated resource declaration into a real (or
//! simulated) resource and reports its attributes back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::ResourceId;
use crate::resource::ResourceKind;

/// Everything a provisioner needs to create one resource.
#[derive(Debug, Clone, Serialize)]
pub struct MaterializeRequest {
    pub stack: String,
    pub logical_id: String,
    pub kind: ResourceKind,
    /// Target region, when the stack pins one.
    pub region: Option<String>,
    /// Configuration with all attribute templates substituted.
    pub configuration: Map<String, Value>,
    /// Tags applied to every resource of the composition.
    pub tags: BTreeMap<String, String>,
}

/// Handle to a materialized resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceHandle {
    pub id: ResourceId,
    pub kind: ResourceKind,
    /// Named attributes such as `arn`, `name` or `domain_name`.
    pub attributes: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
}

impl ResourceHandle {
    pub fn new(kind: ResourceKind) -> Self {
        Self {
            id: ResourceId::new(),
            kind,
            attributes: BTreeMap::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_attribute(mut self, name: &str, value: impl Into<String>) -> Self {
        self.attributes.insert(name.to_string(), value.into());
        self
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }
}

/// Failure reported by a provisioner, carried verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{provider}: {message}")]
pub struct ProvisioningError {
    /// Name of the provisioner that failed.
    pub provider: String,
    pub message: String,
}

impl ProvisioningError {
    pub fn new(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            message: message.into(),
        }
    }
}

/// Trait for provisioning backends.
///
/// Calls are synchronous from the caller's point of view; retry policy, if
/// any, belongs to the implementation.
pub trait Provisioner {
    /// Name of this provisioner.
    fn name(&self) -> &'static str;

    /// Create the resource described by `request`.
    fn materialize(
        &mut self,
        request: &MaterializeRequest,
    ) -> Result<ResourceHandle, ProvisioningError>;
}

impl<P: Provisioner + ?Sized> Provisioner for Box<P> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn materialize(
        &mut self,
        request: &MaterializeRequest,
    ) -> Result<ResourceHandle, ProvisioningError> {
        (**self).materialize(request)
    }
}
