//! Composition planning: the stack dependency graph and its order.

use serde::Serialize;
use std::collections::{HashMap, HashSet};

use stackit_core::order::topological_order;
use stackit_core::stack::StackSpec;
use stackit_core::{Error, Result};

/// Why one stack depends on another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EdgeReason {
    /// An import of the target's export.
    Import { resource: String, export: String },
    /// An explicit `depends_on` naming the target stack.
    DependsOn { resource: String },
}

/// `from` must be constructed after `to`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Edge {
    pub from: String,
    pub to: String,
    pub reason: EdgeReason,
}

/// Construction order for a set of stacks.
#[derive(Debug, Clone, Serialize)]
pub struct Plan {
    /// Stack names, dependencies first.
    pub order: Vec<String>,
    pub edges: Vec<Edge>,
}

impl Plan {
    /// Validate every stack and order them by their references.
    ///
    /// Nothing is provisioned; on error no stack has been touched.
    pub fn build(specs: &[StackSpec]) -> Result<Plan> {
        let mut index: HashMap<&str, usize> = HashMap::new();
        for (i, spec) in specs.iter().enumerate() {
            if index.insert(spec.name.as_str(), i).is_some() {
                return Err(Error::DuplicateStack(spec.name.clone()));
            }
        }

        let names: HashSet<&str> = index.keys().copied().collect();
        for spec in specs {
            spec.validate_in(&names)?;
        }

        let mut edges = Vec::new();
        for spec in specs {
            for resource in &spec.resources {
                // Imports of unknown stacks or malformed refs add no edge;
                // they surface as unresolved during construction.
                if let Some(key) = resource.import_key() {
                    if index.contains_key(key.stack.as_str()) {
                        edges.push(Edge {
                            from: spec.name.clone(),
                            to: key.stack,
                            reason: EdgeReason::Import {
                                resource: resource.logical_id.clone(),
                                export: key.export,
                            },
                        });
                    }
                }
            }

            let local: HashSet<&str> =
                spec.resources.iter().map(|r| r.logical_id.as_str()).collect();
            for resource in &spec.resources {
                // Targets were checked by validate_in; non-local ones are stacks
                for target in resource.depends_on.iter().filter(|t| !local.contains(t.as_str())) {
                    edges.push(Edge {
                        from: spec.name.clone(),
                        to: target.clone(),
                        reason: EdgeReason::DependsOn {
                            resource: resource.logical_id.clone(),
                        },
                    });
                }
            }
        }

        let mut deps: Vec<Vec<usize>> = vec![Vec::new(); specs.len()];
        for edge in &edges {
            let from = index[edge.from.as_str()];
            let to = index[edge.to.as_str()];
            if !deps[from].contains(&to) {
                deps[from].push(to);
            }
        }

        let order = topological_order(&deps).map_err(|cycle| Error::CyclicDependency {
            path: cycle.into_iter().map(|i| specs[i].name.clone()).collect(),
        })?;

        Ok(Plan {
            order: order.into_iter().map(|i| specs[i].name.clone()).collect(),
            edges,
        })
    }

    /// Stacks `stack` must be constructed after.
    pub fn dependencies_of(&self, stack: &str) -> Vec<&str> {
        let mut deps: Vec<&str> = Vec::new();
        for edge in self.edges.iter().filter(|e| e.from == stack) {
            if !deps.contains(&edge.to.as_str()) {
                deps.push(edge.to.as_str());
            }
        }
        deps
    }

    pub fn position(&self, stack: &str) -> Option<usize> {
        self.order.iter().position(|s| s == stack)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stackit_core::resource::{ResourceDeclaration, ResourceKind};

    fn importer(name: &str, refs: &[&str]) -> StackSpec {
        refs.iter().enumerate().fold(StackSpec::new(name), |spec, (i, r)| {
            spec.resource(ResourceDeclaration::import(format!("import{i}"), *r))
        })
    }

    #[test]
    fn test_order_follows_imports() {
        let specs = vec![
            importer("deploy", &["build:Artifact"]),
            importer("test", &[]),
            importer("build", &["test:Report"]),
        ];

        let plan = Plan::build(&specs).unwrap();
        assert_eq!(plan.order, vec!["test", "build", "deploy"]);
        assert_eq!(plan.dependencies_of("deploy"), vec!["build"]);
        assert_eq!(plan.edges.len(), 2);
    }

    #[test]
    fn test_unknown_stack_import_adds_no_edge() {
        let specs = vec![importer("C", &["D:Z"])];
        let plan = Plan::build(&specs).unwrap();
        assert_eq!(plan.order, vec!["C"]);
        assert!(plan.edges.is_empty());
    }

    #[test]
    fn test_malformed_import_adds_no_edge() {
        let specs = vec![importer("A", &[]), importer("B", &["A-X"])];
        let plan = Plan::build(&specs).unwrap();
        assert!(plan.edges.is_empty());
    }

    #[test]
    fn test_cycle_reports_full_path() {
        let specs = vec![importer("P", &["Q:Out"]), importer("Q", &["P:Out"])];
        match Plan::build(&specs).unwrap_err() {
            Error::CyclicDependency { path } => assert_eq!(path, vec!["P", "Q", "P"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_depends_on_stack_adds_edge() {
        let specs = vec![
            StackSpec::new("web").resource(
                ResourceDeclaration::new("Site", ResourceKind::Bucket).depends_on("secrets"),
            ),
            StackSpec::new("secrets"),
        ];
        let plan = Plan::build(&specs).unwrap();
        assert_eq!(plan.order, vec!["secrets", "web"]);
        assert!(matches!(plan.edges[0].reason, EdgeReason::DependsOn { .. }));
    }

    #[test]
    fn test_depends_on_unknown_target() {
        let specs = vec![StackSpec::new("web").resource(
            ResourceDeclaration::new("Site", ResourceKind::Bucket).depends_on("nowhere"),
        )];
        let err = Plan::build(&specs).unwrap_err();
        assert!(matches!(err, Error::InvalidConfiguration { .. }));
    }

    #[test]
    fn test_duplicate_stack_names() {
        let specs = vec![StackSpec::new("a"), StackSpec::new("a")];
        let err = Plan::build(&specs).unwrap_err();
        assert!(matches!(err, Error::DuplicateStack(name) if name == "a"));
    }
}
