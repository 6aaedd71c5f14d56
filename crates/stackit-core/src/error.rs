//! Error types for Stackit.

use thiserror::Error;

use crate::export::UnresolvedExport;
use crate::provisioner::ProvisioningError;
use crate::resource::ResourceKind;

#[derive(Debug, Error)]
pub enum Error {
    #[error(
        "invalid configuration in stack '{stack}'{}: {message}",
        resource_context(.resource, .kind)
    )]
    InvalidConfiguration {
        stack: String,
        resource: Option<String>,
        kind: Option<ResourceKind>,
        message: String,
    },

    #[error("duplicate export '{export}' in stack '{stack}'")]
    DuplicateExport { stack: String, export: String },

    #[error("duplicate stack name: {0}")]
    DuplicateStack(String),

    #[error("stack '{stack}' resource '{resource}': {source}")]
    CrossStackUnresolved {
        stack: String,
        resource: String,
        #[source]
        source: UnresolvedExport,
    },

    #[error("cycle detected in dependencies: {}", .path.join(" -> "))]
    CyclicDependency { path: Vec<String> },

    #[error("provisioning {kind} '{resource}' in stack '{stack}' failed: {source}")]
    Provisioning {
        stack: String,
        resource: String,
        kind: ResourceKind,
        #[source]
        source: ProvisioningError,
    },
}

impl Error {
    /// Shorthand for a configuration error scoped to one resource.
    pub fn invalid_resource(
        stack: &str,
        resource: &str,
        kind: ResourceKind,
        message: impl Into<String>,
    ) -> Self {
        Error::InvalidConfiguration {
            stack: stack.to_string(),
            resource: Some(resource.to_string()),
            kind: Some(kind),
            message: message.into(),
        }
    }

    /// Shorthand for a configuration error that is not tied to a resource.
    pub fn invalid_stack(stack: &str, message: impl Into<String>) -> Self {
        Error::InvalidConfiguration {
            stack: stack.to_string(),
            resource: None,
            kind: None,
            message: message.into(),
        }
    }

    /// Name of the stack the error was raised in, if any.
    pub fn stack(&self) -> Option<&str> {
        match self {
            Error::InvalidConfiguration { stack, .. }
            | Error::DuplicateExport { stack, .. }
            | Error::CrossStackUnresolved { stack, .. }
            | Error::Provisioning { stack, .. } => Some(stack),
            Error::DuplicateStack(stack) => Some(stack),
            Error::CyclicDependency { .. } => None,
        }
    }
}

fn resource_context(resource: &Option<String>, kind: &Option<ResourceKind>) -> String {
    match (resource, kind) {
        (Some(resource), Some(kind)) => format!(" ({kind} '{resource}')"),
        (Some(resource), None) => format!(" (resource '{resource}')"),
        _ => String::new(),
    }
}

pub type Result<T> = std::result::Result<T, Error>;
