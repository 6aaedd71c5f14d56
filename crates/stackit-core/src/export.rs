//! Export registry shared by the stacks of one composition.
//!
//! Keys are `(stack, export)` pairs, written exactly once by the producing
//! stack and read by any stack that imports them.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

use crate::{Error, Result};

/// Address of an exported value, written as `stack:export`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ExportKey {
    pub stack: String,
    pub export: String,
}

impl ExportKey {
    pub fn new(stack: impl Into<String>, export: impl Into<String>) -> Self {
        Self {
            stack: stack.into(),
            export: export.into(),
        }
    }
}

impl std::fmt::Display for ExportKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.stack, self.export)
    }
}

impl std::str::FromStr for ExportKey {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((stack, export))
                if !stack.trim().is_empty() && !export.trim().is_empty() && !export.contains(':') =>
            {
                Ok(Self::new(stack.trim(), export.trim()))
            }
            _ => Err(format!("malformed export reference '{s}', expected 'stack:export'")),
        }
    }
}

/// A registered export value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportEntry {
    pub value: String,
    /// Stack that registered the value.
    pub producer: String,
}

/// Why a lookup failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnresolvedReason {
    /// The producing stack has not been constructed (or does not exist).
    StackNotConstructed,
    /// The producing stack was constructed but never exported this name.
    UnknownExport,
    /// The reference string is not of the form `stack:export`.
    Malformed,
}

impl std::fmt::Display for UnresolvedReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnresolvedReason::StackNotConstructed => write!(f, "producing stack not constructed"),
            UnresolvedReason::UnknownExport => write!(f, "stack has no such export"),
            UnresolvedReason::Malformed => write!(f, "malformed reference"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unresolved export '{reference}': {reason}")]
pub struct UnresolvedExport {
    /// The reference as written, `stack:export` when well-formed.
    pub reference: String,
    /// Parsed key, absent for malformed references.
    pub key: Option<ExportKey>,
    pub reason: UnresolvedReason,
}

impl UnresolvedExport {
    pub fn malformed(reference: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            key: None,
            reason: UnresolvedReason::Malformed,
        }
    }
}

/// Write-once store of every export produced during a composition.
#[derive(Debug, Clone, Default)]
pub struct ExportRegistry {
    entries: BTreeMap<ExportKey, ExportEntry>,
    constructed: BTreeSet<String>,
}

/// Serialized as a map keyed by `stack:export`.
impl Serialize for ExportRegistry {
    fn serialize<S: serde::Serializer>(
        &self,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_map(self.entries.iter().map(|(key, entry)| (key.to_string(), entry)))
    }
}

impl ExportRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` under `(stack, export)`.
    pub fn register(&mut self, stack: &str, export: &str, value: impl Into<String>) -> Result<()> {
        let key = ExportKey::new(stack, export);
        if self.entries.contains_key(&key) {
            return Err(Error::DuplicateExport {
                stack: stack.to_string(),
                export: export.to_string(),
            });
        }

        self.entries.insert(
            key,
            ExportEntry {
                value: value.into(),
                producer: stack.to_string(),
            },
        );
        Ok(())
    }

    /// Store every export of `stack`, or none of them.
    pub fn register_all(&mut self, stack: &str, exports: &BTreeMap<String, String>) -> Result<()> {
        if let Some(export) = exports
            .keys()
            .find(|export| self.entries.contains_key(&ExportKey::new(stack, export.as_str())))
        {
            return Err(Error::DuplicateExport {
                stack: stack.to_string(),
                export: export.clone(),
            });
        }

        for (export, value) in exports {
            self.register(stack, export, value.clone())?;
        }
        Ok(())
    }

    /// Look up a registered value.
    pub fn resolve(
        &self,
        stack: &str,
        export: &str,
    ) -> std::result::Result<&str, UnresolvedExport> {
        let key = ExportKey::new(stack, export);
        if let Some(entry) = self.entries.get(&key) {
            return Ok(&entry.value);
        }

        let reason = if self.constructed.contains(stack) {
            UnresolvedReason::UnknownExport
        } else {
            UnresolvedReason::StackNotConstructed
        };
        Err(UnresolvedExport {
            reference: key.to_string(),
            key: Some(key),
            reason,
        })
    }

    /// Resolve a `stack:export` reference string.
    pub fn resolve_ref(&self, reference: &str) -> std::result::Result<&str, UnresolvedExport> {
        let key: ExportKey = reference
            .parse()
            .map_err(|_| UnresolvedExport::malformed(reference))?;
        self.resolve(&key.stack, &key.export)
    }

    /// Record that `stack` finished construction.
    pub fn mark_constructed(&mut self, stack: &str) {
        self.constructed.insert(stack.to_string());
    }

    pub fn is_constructed(&self, stack: &str) -> bool {
        self.constructed.contains(stack)
    }

    /// Stacks that finished construction, in name order.
    pub fn constructed(&self) -> impl Iterator<Item = &str> {
        self.constructed.iter().map(String::as_str)
    }

    pub fn get(&self, key: &ExportKey) -> Option<&ExportEntry> {
        self.entries.get(key)
    }

    /// All entries, ordered by key.
    pub fn entries(&self) -> impl Iterator<Item = (&ExportKey, &ExportEntry)> {
        self.entries.iter()
    }

    /// Exports produced by one stack.
    pub fn exports_of<'a>(
        &'a self,
        stack: &'a str,
    ) -> impl Iterator<Item = (&'a str, &'a str)> + 'a {
        self.entries
            .iter()
            .filter(move |(key, _)| key.stack == stack)
            .map(|(key, entry)| (key.export.as_str(), entry.value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Flat `stack:export -> value` map, for display and JSON output.
    pub fn to_map(&self) -> BTreeMap<String, String> {
        self.entries
            .iter()
            .map(|(key, entry)| (key.to_string(), entry.value.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_resolve() {
        let mut registry = ExportRegistry::new();
        registry
            .register(
                "global-secrets-stack",
                "WebInfra",
                "arn:aws:secretsmanager:us-east-1:1:secret:WebInfra",
            )
            .unwrap();

        let first = registry.resolve("global-secrets-stack", "WebInfra").unwrap();
        let second = registry.resolve("global-secrets-stack", "WebInfra").unwrap();
        assert_eq!(first, "arn:aws:secretsmanager:us-east-1:1:secret:WebInfra");
        assert_eq!(first, second);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_duplicate_register_rejected() {
        let mut registry = ExportRegistry::new();
        registry.register("a", "X", "1").unwrap();
        let err = registry.register("a", "X", "2").unwrap_err();
        assert!(matches!(err, Error::DuplicateExport { .. }));
        assert_eq!(registry.resolve("a", "X").unwrap(), "1");
    }

    #[test]
    fn test_register_all_is_all_or_nothing() {
        let mut registry = ExportRegistry::new();
        registry.register("web", "Url", "https://site").unwrap();

        let exports = BTreeMap::from([
            ("Bucket".to_string(), "site".to_string()),
            ("Url".to_string(), "https://other".to_string()),
        ]);
        let err = registry.register_all("web", &exports).unwrap_err();
        assert!(matches!(err, Error::DuplicateExport { ref export, .. } if export == "Url"));
        assert_eq!(registry.len(), 1);
        assert!(registry.get(&ExportKey::new("web", "Bucket")).is_none());

        registry.mark_constructed("web");
        assert_eq!(registry.constructed().collect::<Vec<_>>(), vec!["web"]);
    }

    #[test]
    fn test_unresolved_reasons() {
        let mut registry = ExportRegistry::new();
        let err = registry.resolve("a", "X").unwrap_err();
        assert_eq!(err.reason, UnresolvedReason::StackNotConstructed);
        assert_eq!(err.key, Some(ExportKey::new("a", "X")));

        registry.register("a", "Y", "1").unwrap();
        registry.mark_constructed("a");
        let err = registry.resolve("a", "X").unwrap_err();
        assert_eq!(err.reason, UnresolvedReason::UnknownExport);
        assert_eq!(err.to_string(), "unresolved export 'a:X': stack has no such export");
    }

    #[test]
    fn test_resolve_ref() {
        let mut registry = ExportRegistry::new();
        registry.register("secrets-stack", "GithubOAuthToken", "arn:token").unwrap();
        assert_eq!(registry.resolve_ref("secrets-stack:GithubOAuthToken").unwrap(), "arn:token");

        let err = registry.resolve_ref("secrets-stack-GithubOAuthToken").unwrap_err();
        assert_eq!(err.reason, UnresolvedReason::Malformed);
        assert!(err.key.is_none());
    }

    #[test]
    fn test_key_parsing() {
        let key: ExportKey = "waf-cloudfront-stack:WhtsqrNextBucket".parse().unwrap();
        assert_eq!(key.stack, "waf-cloudfront-stack");
        assert_eq!(key.export, "WhtsqrNextBucket");
        assert!(":X".parse::<ExportKey>().is_err());
        assert!("a:".parse::<ExportKey>().is_err());
        assert!("a:b:c".parse::<ExportKey>().is_err());
    }

    #[test]
    fn test_exports_of_and_map() {
        let mut registry = ExportRegistry::new();
        registry.register("a", "X", "1").unwrap();
        registry.register("b", "Y", "2").unwrap();
        let a: Vec<_> = registry.exports_of("a").collect();
        assert_eq!(a, vec![("X", "1")]);

        let map = registry.to_map();
        assert_eq!(map.get("b:Y").map(String::as_str), Some("2"));
    }

    #[test]
    fn test_serializes_with_string_keys() {
        let mut registry = ExportRegistry::new();
        registry.register("a", "X", "1").unwrap();
        let json = serde_json::to_value(&registry).unwrap();
        assert_eq!(json["a:X"]["value"], "1");
        assert_eq!(json["a:X"]["producer"], "a");
    }
}
