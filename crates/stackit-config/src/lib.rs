//! KDL configuration parsing for Stackit.
//!
//! This crate handles parsing of:
//! - Composition files (stackit.kdl): stacks, resources, imports, exports
//! - Composition tags and context values

pub mod composition;
pub mod error;

pub use composition::{
    CompositionConfig, ENVIRONMENT_CONTEXT, ENVIRONMENT_TAG, load_composition, parse_composition,
    parse_context_arg,
};
pub use error::{ConfigError, ConfigResult};
