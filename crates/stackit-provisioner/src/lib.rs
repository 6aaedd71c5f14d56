//! Provisioning backends for Stackit.
//!
//! Provides provisioner implementations:
//! - In-memory (synthesis, local validation and tests)

pub mod memory;

pub use memory::{InMemoryProvisioner, ProvisionedResource};
pub use stackit_core::provisioner::{
    MaterializeRequest, Provisioner, ProvisioningError, ResourceHandle,
};
