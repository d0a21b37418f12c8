//! Per-path array comparison rules
//!
//! An assertion can declare rules that switch sequence comparison from the
//! default [`ArrayStrategy::Exact`] to [`ArrayStrategy::Anywhere`] for paths
//! matching a wildcard pattern:
//!
//! ```yaml
//! options:
//!   arrays:
//!     - path: /spec/containers/*/env
//!       strategy: Anywhere
//!       match:
//!         labels:
//!           app: web
//! ```
//!
//! Rules are tried top to bottom and the first match wins. A rule with a
//! `match` only applies when that metadata subset is present on the asserted
//! document.

use crate::resource::{metadata, Node};
use crate::subset::{is_subset, ArrayStrategy, ExactStrategy, StrategyResolver};
use crate::wildcard;
use serde::{Deserialize, Serialize};

/// Assertion options attached to an assert document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssertOptions {
    /// Array comparison rules, evaluated in order
    #[serde(default, rename = "arrays")]
    pub arrays: Vec<ArrayRule>,
}

impl AssertOptions {
    /// Options with no rules (everything compared exactly)
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a rule
    #[must_use]
    pub fn rule(mut self, rule: ArrayRule) -> Self {
        self.arrays.push(rule);
        self
    }
}

/// A wildcard path pattern and the strategy to use for matching sequences
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayRule {
    /// Wildcard pattern over sequence paths (e.g., "/spec/containers/*")
    pub path: String,
    /// Strategy for matching sequences
    pub strategy: ArrayStrategy,
    /// Metadata subset (labels, annotations...) the document must carry
    #[serde(default, rename = "match", skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Node>,
}

impl ArrayRule {
    /// Rule applying `strategy` to paths matching `path`
    pub fn new(path: impl Into<String>, strategy: ArrayStrategy) -> Self {
        Self {
            path: path.into(),
            strategy,
            metadata: None,
        }
    }

    /// Only apply the rule to documents whose metadata contains `predicate`
    #[must_use]
    pub fn when_metadata(mut self, predicate: Node) -> Self {
        self.metadata = Some(predicate);
        self
    }
}

/// Whether a rule pattern matches a concrete sequence path
///
/// A single trailing `/` on the pattern is ignored.
pub fn path_matches(pattern: &str, path: &str) -> bool {
    let pattern = pattern.strip_suffix('/').unwrap_or(pattern);
    wildcard::is_match(pattern, path)
}

/// Whether a rule's metadata predicate holds for a document's metadata
pub fn metadata_matches(rule: &ArrayRule, object: &Node) -> bool {
    let Some(predicate) = &rule.metadata else {
        return true;
    };
    let predicate = prune_empty(predicate);
    if predicate.as_object().is_some_and(serde_json::Map::is_empty) {
        return true;
    }

    let empty = Node::Object(serde_json::Map::new());
    let actual = metadata(object).unwrap_or(&empty);
    is_subset(&predicate, actual, "", &ExactStrategy).is_ok()
}

/// Drop empty mappings so that `annotations: {}` constrains nothing
fn prune_empty(node: &Node) -> Node {
    match node {
        Node::Object(map) => Node::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), prune_empty(v)))
                .filter(|(_, v)| !v.as_object().is_some_and(serde_json::Map::is_empty))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Resolver backed by an assertion's rule list
///
/// Every sequence, at every depth, is resolved independently against the same
/// rules; the strategy picked for an outer sequence does not carry over to the
/// sequences nested inside it.
#[derive(Debug, Clone, Copy)]
pub struct RuleResolver<'a> {
    rules: &'a [ArrayRule],
    object: &'a Node,
}

impl<'a> RuleResolver<'a> {
    /// Resolver for `options`, gating metadata rules on `object`
    pub fn new(options: &'a AssertOptions, object: &'a Node) -> Self {
        Self {
            rules: &options.arrays,
            object,
        }
    }
}

impl StrategyResolver for RuleResolver<'_> {
    fn resolve(&self, path: &str) -> ArrayStrategy {
        self.rules
            .iter()
            .find(|rule| path_matches(&rule.path, path) && metadata_matches(rule, self.object))
            .map_or(ArrayStrategy::Exact, |rule| rule.strategy)
    }
}
