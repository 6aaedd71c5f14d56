//! Composer - constructs stacks in dependency order.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use tracing::{error, info};

use stackit_core::export::ExportRegistry;
use stackit_core::provisioner::Provisioner;
use stackit_core::stack::{ConstructContext, Stack, StackSpec};
use stackit_core::{Error, Result};

use crate::plan::Plan;

/// Where a composition run currently is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompositionState {
    Idle,
    Planning,
    Constructing { stack: String },
    Complete,
    Failed { message: String },
}

impl CompositionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CompositionState::Complete | CompositionState::Failed { .. })
    }
}

impl std::fmt::Display for CompositionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompositionState::Idle => write!(f, "idle"),
            CompositionState::Planning => write!(f, "planning"),
            CompositionState::Constructing { stack } => write!(f, "constructing {stack}"),
            CompositionState::Complete => write!(f, "complete"),
            CompositionState::Failed { message } => write!(f, "failed: {message}"),
        }
    }
}

/// Result of a successful composition run.
#[derive(Debug, Clone, Serialize)]
pub struct Composition {
    /// Stack names in construction order.
    pub order: Vec<String>,
    pub stacks: Vec<Stack>,
    pub registry: ExportRegistry,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl Composition {
    pub fn stack(&self, name: &str) -> Option<&Stack> {
        self.stacks.iter().find(|s| s.name == name)
    }

    /// Value of `stack:export`, if registered.
    pub fn export(&self, stack: &str, export: &str) -> Option<&str> {
        self.registry.resolve(stack, export).ok()
    }

    /// Every export as `stack:export -> value`.
    pub fn outputs(&self) -> BTreeMap<String, String> {
        self.registry.to_map()
    }
}

/// Drives a composition: plans, then constructs each stack exactly once.
pub struct Composer<P: Provisioner> {
    provisioner: P,
    tags: BTreeMap<String, String>,
    state: CompositionState,
}

impl<P: Provisioner> Composer<P> {
    pub fn new(provisioner: P) -> Self {
        Self {
            provisioner,
            tags: BTreeMap::new(),
            state: CompositionState::Idle,
        }
    }

    /// Tags stamped on every materialized resource.
    pub fn with_tags(mut self, tags: BTreeMap<String, String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn state(&self) -> &CompositionState {
        &self.state
    }

    pub fn provisioner(&self) -> &P {
        &self.provisioner
    }

    pub fn into_provisioner(self) -> P {
        self.provisioner
    }

    /// Plan without constructing anything.
    pub fn plan(&self, specs: &[StackSpec]) -> Result<Plan> {
        Plan::build(specs)
    }

    /// Construct every stack in dependency order.
    ///
    /// Fails fast: the first error stops the run and nothing already
    /// constructed is rolled back.
    pub fn compose(&mut self, specs: &[StackSpec]) -> Result<Composition> {
        let started_at = Utc::now();
        self.state = CompositionState::Planning;

        let plan = match Plan::build(specs) {
            Ok(plan) => plan,
            Err(e) => {
                error!(error = %e, "Composition planning failed");
                return Err(self.fail(e));
            }
        };

        info!(stacks = plan.order.len(), order = ?plan.order, "Composition planned");

        let by_name: HashMap<&str, &StackSpec> =
            specs.iter().map(|s| (s.name.as_str(), s)).collect();
        let mut registry = ExportRegistry::new();
        let mut stacks = Vec::with_capacity(plan.order.len());

        for name in &plan.order {
            let spec = by_name[name.as_str()];
            self.state = CompositionState::Constructing {
                stack: name.clone(),
            };

            let mut ctx = ConstructContext {
                registry: &mut registry,
                provisioner: &mut self.provisioner,
                tags: &self.tags,
            };

            match Stack::construct(spec, &mut ctx) {
                Ok(stack) => stacks.push(stack),
                Err(e) => {
                    error!(stack = %name, error = %e, "Stack construction failed");
                    return Err(self.fail(e));
                }
            }
        }

        self.state = CompositionState::Complete;
        info!(
            stacks = stacks.len(),
            exports = registry.len(),
            "Composition complete"
        );

        Ok(Composition {
            order: plan.order,
            stacks,
            registry,
            started_at,
            finished_at: Utc::now(),
        })
    }

    fn fail(&mut self, error: Error) -> Error {
        self.state = CompositionState::Failed {
            message: error.to_string(),
        };
        error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stackit_core::export::UnresolvedReason;
    use stackit_core::resource::{ResourceDeclaration, ResourceKind};
    use stackit_core::stack::ExportExpr;
    use stackit_provisioner::InMemoryProvisioner;

    fn composer() -> Composer<InMemoryProvisioner> {
        Composer::new(InMemoryProvisioner::default())
    }

    /// Stack with one bucket and `imports`, exporting `name` as the bucket name.
    fn stack(name: &str, imports: &[&str]) -> StackSpec {
        let spec = StackSpec::new(name)
            .resource(ResourceDeclaration::new("Bucket", ResourceKind::Bucket))
            .export("BucketName", ExportExpr::attribute("Bucket", "name"));
        imports.iter().enumerate().fold(spec, |spec, (i, r)| {
            spec.resource(ResourceDeclaration::import(format!("Import{i}"), *r))
        })
    }

    fn constructed_stacks(provisioner: &InMemoryProvisioner) -> Vec<&str> {
        provisioner.requests().iter().map(|r| r.stack.as_str()).collect()
    }

    #[test]
    fn test_out_of_order_input_scenario() {
        let a = StackSpec::new("A").export("X", ExportExpr::template("1"));
        let b = StackSpec::new("B")
            .resource(ResourceDeclaration::import("x", "A:X"))
            .export(
                "Y",
                ExportExpr::Sum(vec![
                    ExportExpr::attribute("x", "value"),
                    ExportExpr::template("1"),
                ]),
            );

        let mut composer = composer();
        let composition = composer.compose(&[b, a]).unwrap();

        assert_eq!(composition.order, vec!["A", "B"]);
        assert_eq!(
            composition.outputs(),
            BTreeMap::from([
                ("A:X".to_string(), "1".to_string()),
                ("B:Y".to_string(), "2".to_string()),
            ])
        );
        assert_eq!(composer.state(), &CompositionState::Complete);
    }

    #[test]
    fn test_acyclic_graph_constructs_each_stack_once_after_dependencies() {
        let specs = vec![
            stack("app", &["network:BucketName", "secrets:BucketName"]),
            stack("secrets", &[]),
            stack("edge", &["app:BucketName"]),
            stack("network", &["secrets:BucketName"]),
        ];

        let mut composer = composer();
        let composition = composer.compose(&specs).unwrap();
        assert_eq!(composition.order, vec!["secrets", "network", "app", "edge"]);

        let provisioner = composer.into_provisioner();
        assert_eq!(constructed_stacks(&provisioner), vec!["secrets", "network", "app", "edge"]);
        assert_eq!(composition.stacks.len(), 4);
        assert_eq!(composition.registry.len(), 4);
    }

    #[test]
    fn test_round_trip_of_export_value() {
        let specs = vec![stack("consumer", &["producer:BucketName"]), stack("producer", &[])];
        let mut composer = composer();
        let composition = composer.compose(&specs).unwrap();

        let exported = composition.export("producer", "BucketName").unwrap();
        let consumer = composition.stack("consumer").unwrap();
        let import = consumer.resource("Import0").unwrap();
        assert_eq!(import.handle.attribute("value"), Some(exported));

        // Repeated lookups return the identical value
        assert_eq!(composition.export("producer", "BucketName"), Some(exported));
    }

    #[test]
    fn test_cycle_constructs_nothing() {
        let specs = vec![stack("P", &["Q:BucketName"]), stack("Q", &["P:BucketName"])];
        let mut composer = composer();
        let err = composer.compose(&specs).unwrap_err();

        match err {
            Error::CyclicDependency { ref path } => assert_eq!(path, &vec!["P", "Q", "P"]),
            ref other => panic!("unexpected error: {other}"),
        }
        assert!(matches!(composer.state(), CompositionState::Failed { .. }));
        assert!(composer.provisioner().requests().is_empty());
    }

    #[test]
    fn test_unresolved_reference_to_undeclared_stack() {
        let c = StackSpec::new("C").resource(ResourceDeclaration::import("z", "D:Z"));
        let mut composer = composer();
        let err = composer.compose(&[c]).unwrap_err();

        match err {
            Error::CrossStackUnresolved { stack, source, .. } => {
                assert_eq!(stack, "C");
                assert_eq!(source.key.unwrap().to_string(), "D:Z");
                assert_eq!(source.reason, UnresolvedReason::StackNotConstructed);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unknown_export_of_constructed_stack() {
        let specs = vec![stack("A", &[]), stack("B", &["A:Missing"])];
        let mut composer = composer();
        let err = composer.compose(&specs).unwrap_err();

        match err {
            Error::CrossStackUnresolved { source, .. } => {
                assert_eq!(source.reason, UnresolvedReason::UnknownExport)
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_malformed_reference_surfaces_during_construction() {
        let specs = vec![stack("A", &[]), stack("B", &["A-BucketName"])];
        let mut composer = composer();
        let err = composer.compose(&specs).unwrap_err();

        match err {
            Error::CrossStackUnresolved { stack, source, .. } => {
                assert_eq!(stack, "B");
                assert_eq!(source.reason, UnresolvedReason::Malformed);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_duplicate_export_aborts_before_any_materialization() {
        let bad = StackSpec::new("bad")
            .resource(ResourceDeclaration::new("Bucket", ResourceKind::Bucket))
            .export("Name", ExportExpr::attribute("Bucket", "name"))
            .export("Name", ExportExpr::attribute("Bucket", "arn"));
        let mut composer = composer();
        let err = composer.compose(&[stack("good", &[]), bad]).unwrap_err();

        assert!(matches!(err, Error::DuplicateExport { .. }));
        assert!(composer.provisioner().requests().is_empty());
    }

    #[test]
    fn test_invalid_configuration_detected_during_planning() {
        let bad = StackSpec::new("web").resource(
            ResourceDeclaration::new("Waf", ResourceKind::WebAcl).with("scope", "CLOUDFRONT"),
        );
        let mut composer = composer();
        let err = composer.compose(&[stack("first", &[]), bad]).unwrap_err();

        assert!(matches!(err, Error::InvalidConfiguration { .. }));
        assert!(composer.provisioner().requests().is_empty());
    }

    #[test]
    fn test_provisioning_failure_stops_the_run() {
        let specs = vec![stack("A", &[]), stack("B", &["A:BucketName"]), stack("C", &[])];
        let provisioner = InMemoryProvisioner::default().fail_on("Bucket", "AccessDenied");
        let mut composer = Composer::new(provisioner);
        let err = composer.compose(&specs).unwrap_err();

        match err {
            Error::Provisioning { ref stack, ref resource, .. } => {
                assert_eq!(stack, "A");
                assert_eq!(resource, "Bucket");
            }
            ref other => panic!("unexpected error: {other}"),
        }
        assert!(err.to_string().contains("AccessDenied"));
        assert_eq!(composer.provisioner().requests().len(), 1);
        assert_eq!(
            composer.state(),
            &CompositionState::Failed {
                message: err.to_string()
            }
        );
    }

    #[test]
    fn test_depends_on_another_stack() {
        let web = StackSpec::new("web").resource(
            ResourceDeclaration::new("Site", ResourceKind::Bucket).depends_on("secrets"),
        );
        let mut composer = composer();
        let composition = composer.compose(&[web, stack("secrets", &[])]).unwrap();

        assert_eq!(composition.order, vec!["secrets", "web"]);
        assert_eq!(constructed_stacks(composer.provisioner()), vec!["secrets", "web"]);
    }

    #[test]
    fn test_dangling_depends_on_constructs_nothing() {
        let web = StackSpec::new("web").resource(
            ResourceDeclaration::new("Site", ResourceKind::Bucket).depends_on("nowhere"),
        );
        let mut composer = composer();
        let err = composer.compose(&[stack("first", &[]), web]).unwrap_err();

        assert!(matches!(err, Error::InvalidConfiguration { .. }));
        assert!(composer.provisioner().requests().is_empty());
    }

    #[test]
    fn test_tags_reach_every_resource() {
        let tags = BTreeMap::from([("Environment".to_string(), "not-set".to_string())]);
        let mut composer = composer().with_tags(tags);
        composer.compose(&[stack("A", &[])]).unwrap();

        for resource in composer.provisioner().resources() {
            assert_eq!(resource.tags["Environment"], "not-set");
        }
    }

    #[test]
    fn test_bundled_composition() {
        let mut config =
            stackit_config::parse_composition(include_str!("../../../stackit.kdl")).unwrap();
        config.set_context("environment", "dev");

        let mut composer =
            Composer::new(InMemoryProvisioner::default()).with_tags(config.effective_tags());
        let composition = composer.compose(&config.stacks).unwrap();

        let position = |name: &str| composition.order.iter().position(|s| s == name).unwrap();
        assert!(position("global-secrets-stack") < position("waf-cloudfront-stack"));
        assert!(position("secrets-stack") < position("serverless-app-pipeline"));

        let pipeline = composition.stack("serverless-app-pipeline").unwrap();
        let build = pipeline.resource("Build").unwrap();
        let build_arn = build.handle.attribute("arn").unwrap();
        assert!(build_arn.ends_with(":project/build-proj-for-next-app"));

        let json = serde_json::to_value(&composition.registry).unwrap();
        assert!(json["waf-cloudfront-stack:DistributionId"]["value"].is_string());
        assert_eq!(composition.outputs().len(), 8);

        let provisioner = composer.provisioner();
        let cert = provisioner
            .requests()
            .iter()
            .find(|r| r.logical_id == "CFCert")
            .unwrap();
        let secret_arn = composition.export("global-secrets-stack", "WebInfra").unwrap();
        assert_eq!(
            cert.configuration["certificate_arn"],
            format!("{{{{resolve:secretsmanager:{secret_arn}:SecretString:ACM_ARN}}}}")
        );
        assert!(provisioner.resources().iter().all(|r| r.tags["Environment"] == "dev"));

        // The site bucket grants the OAI read access, so it is created after it
        let waf_stack = composition.stack("waf-cloudfront-stack").unwrap();
        let oai = waf_stack.resource("OAI").unwrap();
        let site = provisioner
            .requests()
            .iter()
            .find(|r| r.logical_id == "SiteBucket")
            .unwrap();
        assert_eq!(site.configuration["read_grants"][0], oai.handle.attribute("id").unwrap());
        let ids: Vec<_> = waf_stack.resources.iter().map(|r| r.logical_id.as_str()).collect();
        let at = |id: &str| ids.iter().position(|r| *r == id).unwrap();
        assert!(at("OAI") < at("SiteBucket"));
    }
}
