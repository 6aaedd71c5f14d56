//! Stacks: named bundles of resource declarations and exports.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, info};

use crate::export::ExportRegistry;
use crate::order::topological_order;
use crate::provisioner::{MaterializeRequest, Provisioner, ResourceHandle};
use crate::resource::{ResourceDeclaration, ResourceKind};
use crate::template::{self, AttributeRef, TemplateError};
use crate::{Error, Result};

/// Expression producing an export value from materialized attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportExpr {
    /// Text with `${LogicalId.attribute}` slots.
    Template(String),
    /// Integer sum of the operands.
    Sum(Vec<ExportExpr>),
}

impl ExportExpr {
    pub fn template(text: impl Into<String>) -> Self {
        ExportExpr::Template(text.into())
    }

    /// `${resource.attribute}`
    pub fn attribute(resource: &str, attribute: &str) -> Self {
        ExportExpr::Template(format!("${{{resource}.{attribute}}}"))
    }

    pub fn references(&self) -> Vec<AttributeRef> {
        match self {
            ExportExpr::Template(text) => template::references(text),
            ExportExpr::Sum(operands) => operands.iter().flat_map(ExportExpr::references).collect(),
        }
    }

    /// `${...}` slots that are not valid attribute references.
    pub fn malformed_slots(&self) -> Vec<String> {
        match self {
            ExportExpr::Template(text) => template::malformed_slots(text),
            ExportExpr::Sum(operands) => operands
                .iter()
                .flat_map(ExportExpr::malformed_slots)
                .collect(),
        }
    }

    fn evaluate<F>(&self, lookup: &F) -> std::result::Result<String, String>
    where
        F: Fn(&str, &str) -> Option<String>,
    {
        match self {
            ExportExpr::Template(text) => template::render(text, lookup).map_err(|e| e.to_string()),
            ExportExpr::Sum(operands) => {
                let mut total: i64 = 0;
                for operand in operands {
                    let text = operand.evaluate(lookup)?;
                    let n: i64 = text
                        .trim()
                        .parse()
                        .map_err(|_| format!("operand '{text}' is not an integer"))?;
                    total = total
                        .checked_add(n)
                        .ok_or_else(|| "integer overflow in sum".to_string())?;
                }
                Ok(total.to_string())
            }
        }
    }
}

/// A named export of a stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportSpec {
    pub name: String,
    pub value: ExportExpr,
}

/// Input to [`Stack::construct`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StackSpec {
    pub name: String,
    /// Region the stack is pinned to, e.g. `us-east-1` for CloudFront assets.
    pub region: Option<String>,
    pub resources: Vec<ResourceDeclaration>,
    pub exports: Vec<ExportSpec>,
}

impl StackSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn resource(mut self, declaration: ResourceDeclaration) -> Self {
        self.resources.push(declaration);
        self
    }

    pub fn export(mut self, name: impl Into<String>, value: ExportExpr) -> Self {
        self.exports.push(ExportSpec {
            name: name.into(),
            value,
        });
        self
    }

    /// Raw `ref` strings of every import declaration.
    pub fn import_refs(&self) -> impl Iterator<Item = &str> {
        self.resources.iter().filter_map(ResourceDeclaration::import_ref)
    }

    /// `depends_on` targets that are not resources of this stack.
    ///
    /// These name other stacks of the composition.
    pub fn stack_dependencies(&self) -> Vec<&str> {
        let local: HashSet<&str> = self.resources.iter().map(|r| r.logical_id.as_str()).collect();
        let mut deps = Vec::new();
        for target in self.resources.iter().flat_map(|r| r.depends_on.iter()) {
            if !local.contains(target.as_str()) && !deps.contains(&target.as_str()) {
                deps.push(target.as_str());
            }
        }
        deps
    }

    /// Validate the stack on its own, where every `depends_on` target must
    /// be a resource of this stack.
    pub fn validate(&self) -> Result<Vec<usize>> {
        self.validate_in(&HashSet::new())
    }

    /// Validate every declaration and export and compute the order in which
    /// resources must be materialized.
    ///
    /// `stacks` are the other stacks a `depends_on` target may name.
    /// Performs no provisioning; an error here means nothing was created.
    pub fn validate_in(&self, stacks: &HashSet<&str>) -> Result<Vec<usize>> {
        if self.name.trim().is_empty() {
            return Err(Error::invalid_stack(&self.name, "stack name must not be empty"));
        }

        let mut index: HashMap<&str, usize> = HashMap::new();
        for (i, resource) in self.resources.iter().enumerate() {
            resource.validate(&self.name)?;
            if index.insert(resource.logical_id.as_str(), i).is_some() {
                return Err(Error::invalid_resource(
                    &self.name,
                    &resource.logical_id,
                    resource.kind,
                    "duplicate logical id",
                ));
            }
        }

        let mut seen_exports = HashSet::new();
        for export in &self.exports {
            if export.name.trim().is_empty() {
                return Err(Error::invalid_stack(&self.name, "export name must not be empty"));
            }
            if !seen_exports.insert(export.name.as_str()) {
                return Err(Error::DuplicateExport {
                    stack: self.name.clone(),
                    export: export.name.clone(),
                });
            }
            if let Some(slot) = export.value.malformed_slots().into_iter().next() {
                return Err(Error::invalid_stack(
                    &self.name,
                    format!("export '{}': {}", export.name, TemplateError::Malformed(slot)),
                ));
            }
            for reference in export.value.references() {
                if !index.contains_key(reference.resource.as_str()) {
                    return Err(Error::invalid_stack(
                        &self.name,
                        format!(
                            "export '{}' references unknown resource '{}'",
                            export.name, reference.resource
                        ),
                    ));
                }
            }
        }

        let mut deps: Vec<Vec<usize>> = Vec::with_capacity(self.resources.len());
        for resource in &self.resources {
            let invalid = |message: String| {
                Error::invalid_resource(&self.name, &resource.logical_id, resource.kind, message)
            };

            let mut malformed = resource
                .configuration
                .values()
                .flat_map(template::value_malformed_slots);
            if let Some(slot) = malformed.next() {
                return Err(invalid(TemplateError::Malformed(slot).to_string()));
            }

            let mut edges = Vec::new();
            for reference in resource.configuration.values().flat_map(template::value_references) {
                let Some(&target) = index.get(reference.resource.as_str()) else {
                    return Err(invalid(format!(
                        "references unknown resource '{}'",
                        reference.resource
                    )));
                };
                edges.push(target);
            }
            for target in &resource.depends_on {
                match index.get(target.as_str()) {
                    Some(&local) => edges.push(local),
                    None if stacks.contains(target.as_str()) => {}
                    None => {
                        return Err(invalid(format!(
                            "depends on unknown resource or stack '{target}'"
                        )));
                    }
                }
            }
            deps.push(edges);
        }

        topological_order(&deps).map_err(|cycle| Error::CyclicDependency {
            path: cycle
                .into_iter()
                .map(|i| format!("{}/{}", self.name, self.resources[i].logical_id))
                .collect(),
        })
    }
}

/// A resource after materialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterializedResource {
    pub logical_id: String,
    pub kind: ResourceKind,
    pub handle: ResourceHandle,
}

/// Collaborators used while constructing a stack.
pub struct ConstructContext<'a> {
    pub registry: &'a mut ExportRegistry,
    pub provisioner: &'a mut dyn Provisioner,
    /// Tags applied to every materialized resource.
    pub tags: &'a BTreeMap<String, String>,
}

/// A constructed stack. Immutable once construction completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stack {
    pub name: String,
    pub region: Option<String>,
    /// Resources in materialization order.
    pub resources: Vec<MaterializedResource>,
    pub exports: BTreeMap<String, String>,
}

impl Stack {
    /// Materialize every resource of `spec` and register its exports.
    ///
    /// A `depends_on` naming another stack requires that stack to be
    /// constructed already.
    pub fn construct(spec: &StackSpec, ctx: &mut ConstructContext<'_>) -> Result<Stack> {
        let constructed: HashSet<&str> = ctx.registry.constructed().collect();
        let order = spec.validate_in(&constructed)?;

        info!(
            stack = %spec.name,
            resources = spec.resources.len(),
            provisioner = ctx.provisioner.name(),
            "Constructing stack"
        );

        let mut handles: HashMap<&str, ResourceHandle> = HashMap::new();
        let mut resources = Vec::with_capacity(order.len());

        for idx in order {
            let decl = &spec.resources[idx];
            let handle = match decl.kind {
                ResourceKind::Import => Self::resolve_import(spec, decl, &*ctx.registry)?,
                kind => {
                    let lookup = attribute_lookup(&handles);
                    let configuration = decl
                        .configuration
                        .iter()
                        .map(|(k, v)| Ok((k.clone(), template::render_value(v, &lookup)?)))
                        .collect::<std::result::Result<Map<String, Value>, TemplateError>>()
                        .map_err(|e| {
                            Error::invalid_resource(
                                &spec.name,
                                &decl.logical_id,
                                kind,
                                e.to_string(),
                            )
                        })?;

                    let request = MaterializeRequest {
                        stack: spec.name.clone(),
                        logical_id: decl.logical_id.clone(),
                        kind,
                        region: spec.region.clone(),
                        configuration,
                        tags: ctx.tags.clone(),
                    };

                    ctx.provisioner
                        .materialize(&request)
                        .map_err(|source| Error::Provisioning {
                            stack: spec.name.clone(),
                            resource: decl.logical_id.clone(),
                            kind,
                            source,
                        })?
                }
            };

            debug!(
                stack = %spec.name,
                resource = %decl.logical_id,
                kind = %decl.kind,
                id = %handle.id,
                "Resource materialized"
            );

            resources.push(MaterializedResource {
                logical_id: decl.logical_id.clone(),
                kind: decl.kind,
                handle: handle.clone(),
            });
            handles.insert(decl.logical_id.as_str(), handle);
        }

        // Evaluate everything before touching the registry
        let lookup = attribute_lookup(&handles);
        let mut exports = BTreeMap::new();
        for export in &spec.exports {
            let value = export.value.evaluate(&lookup).map_err(|message| {
                Error::invalid_stack(&spec.name, format!("export '{}': {message}", export.name))
            })?;
            exports.insert(export.name.clone(), value);
        }
        ctx.registry.register_all(&spec.name, &exports)?;
        ctx.registry.mark_constructed(&spec.name);

        info!(stack = %spec.name, exports = exports.len(), "Stack constructed");

        Ok(Stack {
            name: spec.name.clone(),
            region: spec.region.clone(),
            resources,
            exports,
        })
    }

    fn resolve_import(
        spec: &StackSpec,
        decl: &ResourceDeclaration,
        registry: &ExportRegistry,
    ) -> Result<ResourceHandle> {
        let Some(reference) = decl.import_ref() else {
            return Err(Error::invalid_resource(
                &spec.name,
                &decl.logical_id,
                decl.kind,
                "missing required field 'ref'",
            ));
        };

        let value = registry
            .resolve_ref(reference)
            .map_err(|source| Error::CrossStackUnresolved {
                stack: spec.name.clone(),
                resource: decl.logical_id.clone(),
                source,
            })?;

        Ok(ResourceHandle::new(ResourceKind::Import)
            .with_attribute("value", value)
            .with_attribute("ref", reference))
    }

    pub fn resource(&self, logical_id: &str) -> Option<&MaterializedResource> {
        self.resources.iter().find(|r| r.logical_id == logical_id)
    }

    pub fn export(&self, name: &str) -> Option<&str> {
        self.exports.get(name).map(String::as_str)
    }
}

/// Attribute lookup over the handles materialized so far.
fn attribute_lookup<'a>(
    handles: &'a HashMap<&str, ResourceHandle>,
) -> impl Fn(&str, &str) -> Option<String> + 'a {
    move |resource: &str, attribute: &str| {
        handles
            .get(resource)
            .and_then(|h| h.attribute(attribute))
            .map(str::to_string)
    }
}
