//! Structural subset comparison
//!
//! `expected` is a subset of `actual` when every key it names exists in
//! `actual` with a matching value. Keys that only exist in `actual` are
//! ignored. Sequences are compared with a per-path [`ArrayStrategy`] chosen by
//! a [`StrategyResolver`].
//!
//! # Example
//!
//! ```
//! use seppo_harness::subset::{is_subset, ExactStrategy};
//! use serde_json::json;
//!
//! let expected = json!({ "status": { "phase": "Running" } });
//! let actual = json!({ "status": { "phase": "Running", "podIP": "10.0.0.7" } });
//! assert!(is_subset(&expected, &actual, "", &ExactStrategy).is_ok());
//! ```

use crate::resource::Node;
use serde::{Deserialize, Serialize};

/// How two sequences are compared
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArrayStrategy {
    /// Equal length, elements compared at the same index
    #[default]
    Exact,
    /// Every expected element matches at least one actual element
    Anywhere,
}

/// Chooses the sequence strategy for a path
pub trait StrategyResolver {
    /// Strategy for the sequence at `path` (e.g., "/spec/containers[0]/ports")
    fn resolve(&self, path: &str) -> ArrayStrategy;
}

/// Resolver that always compares sequences exactly
#[derive(Debug, Clone, Copy, Default)]
pub struct ExactStrategy;

impl StrategyResolver for ExactStrategy {
    fn resolve(&self, _path: &str) -> ArrayStrategy {
        ArrayStrategy::Exact
    }
}

/// One step of the path to a failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

/// A subset mismatch and where it happened
///
/// The path is collected from the point of failure outward and rendered
/// root-to-leaf, e.g. `/spec/containers[1]/image: value mismatch ...`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{}", render(.path, .message))]
pub struct SubsetError {
    path: Vec<PathSegment>,
    message: String,
}

impl SubsetError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            path: Vec::new(),
            message: message.into(),
        }
    }

    fn within(mut self, segment: PathSegment) -> Self {
        self.path.push(segment);
        self
    }

    /// Failure description without the path
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Path segments from the root to the failing value
    pub fn path(&self) -> impl Iterator<Item = &PathSegment> {
        self.path.iter().rev()
    }

    /// Rendered path, e.g. "/status/phase" or "/spec/containers[0]"
    pub fn path_string(&self) -> String {
        render_path(&self.path)
    }
}

/// Segments are stored leaf first
fn render_path(path: &[PathSegment]) -> String {
    let mut rendered = String::new();
    for segment in path.iter().rev() {
        match segment {
            PathSegment::Key(key) => {
                rendered.push('/');
                rendered.push_str(key);
            }
            PathSegment::Index(i) => rendered.push_str(&format!("[{i}]")),
        }
    }
    rendered
}

fn render(path: &[PathSegment], message: &str) -> String {
    if path.is_empty() {
        message.to_string()
    } else {
        format!("{}: {message}", render_path(path))
    }
}

/// Name of a node's kind for diagnostics
pub fn kind_name(node: &Node) -> &'static str {
    match node {
        Node::Null => "null",
        Node::Bool(_) => "bool",
        Node::Number(_) => "number",
        Node::String(_) => "string",
        Node::Array(_) => "sequence",
        Node::Object(_) => "mapping",
    }
}

fn same_kind(a: &Node, b: &Node) -> bool {
    std::mem::discriminant(a) == std::mem::discriminant(b)
}

/// Check that `expected` is a structural subset of `actual`
///
/// `path` is the location of `expected` within the document (use `""` for the
/// root). Mapping keys are visited in lexicographic order so that the
/// reported failure is stable when several keys mismatch.
pub fn is_subset(
    expected: &Node,
    actual: &Node,
    path: &str,
    resolver: &dyn StrategyResolver,
) -> Result<(), SubsetError> {
    if !same_kind(expected, actual) {
        return Err(SubsetError::new(format!(
            "type mismatch: expected {} but found {}",
            kind_name(expected),
            kind_name(actual)
        )));
    }

    if expected == actual {
        return Ok(());
    }

    match (expected, actual) {
        (Node::Object(expected), Node::Object(actual)) => {
            let mut keys: Vec<&String> = expected.keys().collect();
            keys.sort();

            for key in keys {
                let Some(actual_value) = actual.get(key) else {
                    return Err(SubsetError::new("key is missing from map")
                        .within(PathSegment::Key(key.clone())));
                };
                let child = format!("{path}/{key}");
                is_subset(&expected[key.as_str()], actual_value, &child, resolver)
                    .map_err(|e| e.within(PathSegment::Key(key.clone())))?;
            }
            Ok(())
        }
        (Node::Array(expected), Node::Array(actual)) => match resolver.resolve(path) {
            ArrayStrategy::Exact => compare_exact(expected, actual, path, resolver),
            ArrayStrategy::Anywhere => compare_anywhere(expected, actual, path, resolver),
        },
        _ => Err(SubsetError::new(format!(
            "value mismatch, expected: {expected} != actual: {actual}"
        ))),
    }
}

fn compare_exact(
    expected: &[Node],
    actual: &[Node],
    path: &str,
    resolver: &dyn StrategyResolver,
) -> Result<(), SubsetError> {
    if expected.len() != actual.len() {
        return Err(SubsetError::new(format!(
            "sequence length mismatch at path {}: {} != {}",
            display_path(path),
            expected.len(),
            actual.len()
        )));
    }

    for (i, (e, a)) in expected.iter().zip(actual).enumerate() {
        let child = format!("{path}[{i}]");
        is_subset(e, a, &child, resolver).map_err(|err| err.within(PathSegment::Index(i)))?;
    }
    Ok(())
}

fn compare_anywhere(
    expected: &[Node],
    actual: &[Node],
    path: &str,
    resolver: &dyn StrategyResolver,
) -> Result<(), SubsetError> {
    for (i, e) in expected.iter().enumerate() {
        let child = format!("{path}[{i}]");
        let found = actual
            .iter()
            .any(|a| is_subset(e, a, &child, resolver).is_ok());

        if !found {
            return Err(SubsetError::new(format!(
                "expected item {e} not found in actual sequence at path {}",
                display_path(path)
            ))
            .within(PathSegment::Index(i)));
        }
    }
    Ok(())
}

fn display_path(path: &str) -> &str {
    if path.is_empty() {
        "/"
    } else {
        path
    }
}
