//! Core domain types and traits for Stackit.
//!
//! This crate contains:
//! - Resource declarations and their per-kind configuration shapes
//! - Stacks and their construction
//! - The export registry used for cross-stack references
//! - The provisioner trait resources are materialized through

pub mod error;
pub mod export;
pub mod id;
pub mod order;
pub mod provisioner;
pub mod resource;
pub mod stack;
pub mod template;

pub use error::{Error, Result};
pub use export::{ExportKey, ExportRegistry, UnresolvedExport, UnresolvedReason};
pub use id::ResourceId;
pub use provisioner::{MaterializeRequest, Provisioner, ProvisioningError, ResourceHandle};
pub use resource::{ResourceDeclaration, ResourceKind};
pub use stack::{ConstructContext, ExportExpr, ExportSpec, Stack, StackSpec};
