//! Stack composition for Stackit.
//!
//! Plans the order stacks must be constructed in from their cross-stack
//! references and constructs them one at a time against a provisioner.

pub mod composer;
pub mod plan;

pub use composer::{Composer, Composition, CompositionState};
pub use plan::{Edge, EdgeReason, Plan};
