//! Readable diffs between an expected document and a live object

use crate::resource::Node;
use difference::{Changeset, Difference};

/// Keep only the parts of `actual` that `expected` talks about
///
/// Server-populated fields (managedFields, uid, status the assertion does not
/// mention...) would otherwise drown the interesting lines.
pub fn shrink_to(expected: &Node, actual: &Node) -> Node {
    match (expected, actual) {
        (Node::Object(expected), Node::Object(actual)) => Node::Object(
            actual
                .iter()
                .filter_map(|(key, value)| {
                    expected
                        .get(key)
                        .map(|e| (key.clone(), shrink_to(e, value)))
                })
                .collect(),
        ),
        (Node::Array(expected), Node::Array(actual)) => Node::Array(
            actual
                .iter()
                .enumerate()
                .map(|(i, value)| match expected.get(i) {
                    Some(e) => shrink_to(e, value),
                    None => value.clone(),
                })
                .collect(),
        ),
        _ => actual.clone(),
    }
}

fn prefixed(out: &mut String, prefix: char, chunk: &str) {
    for line in chunk.lines() {
        out.push(prefix);
        out.push_str(line);
        out.push('\n');
    }
}

/// Unified-style line diff of the two documents rendered as YAML
pub fn pretty_diff(expected: &Node, actual: &Node) -> Result<String, serde_yaml::Error> {
    let expected_yaml = serde_yaml::to_string(expected)?;
    let actual_yaml = serde_yaml::to_string(&shrink_to(expected, actual))?;

    let changeset = Changeset::new(&expected_yaml, &actual_yaml, "\n");
    let mut out = String::from("--- expected\n+++ actual\n");
    for diff in &changeset.diffs {
        match diff {
            Difference::Same(x) => prefixed(&mut out, ' ', x),
            Difference::Add(x) => prefixed(&mut out, '+', x),
            Difference::Rem(x) => prefixed(&mut out, '-', x),
        }
    }
    Ok(out)
}
