//! Reference discovery and dependency ordering of schema definitions
//!
//! Definitions may reference each other through `$ref`. Consumers that emit or
//! compile definitions one at a time need every referenced definition to come
//! before its referencer, so [`sort_definitions`] computes that order with
//! Kahn's algorithm over `referenced -> referencer` edges.

use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap};

use serde_json::Value;

use crate::document::{SchemaDocument, reference_name};
use crate::error::SchemaError;

/// Collect every reference name reachable from `node`, in encounter order.
///
/// Walks nested objects and arrays, so references inside method `params`,
/// `returns` and `throws` are found too. A node's own `$ref` is reported before
/// the references of its children. Malformed references are reported verbatim.
pub fn find_references(node: &Value) -> Vec<String> {
    let mut found = Vec::new();
    collect_references(node, &mut found);
    found
}

fn collect_references(node: &Value, found: &mut Vec<String>) {
    match node {
        Value::Object(map) => {
            if let Some(Value::String(reference)) = map.get("$ref") {
                let name = reference_name(reference).unwrap_or(reference.as_str());
                found.push(name.to_string());
            }
            for (key, child) in map {
                if key != "$ref" {
                    collect_references(child, found);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_references(item, found);
            }
        }
        _ => {}
    }
}

/// Order the document's definitions so that every referenced definition
/// precedes the definitions referencing it.
///
/// Among definitions whose dependencies are all satisfied, document order is
/// kept, so unrelated definitions stay in their original relative order.
/// A definition referencing itself is not a cycle. Any other cycle is an error
/// naming the definitions that could not be ordered.
pub fn sort_definitions(document: &SchemaDocument) -> Result<Vec<(String, Value)>, SchemaError> {
    let definitions = document.definitions();
    let position: HashMap<&str, usize> = definitions
        .keys()
        .enumerate()
        .map(|(i, name)| (name.as_str(), i))
        .collect();

    let mut dependents: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); definitions.len()];
    let mut in_degree = vec![0usize; definitions.len()];

    for (index, (name, body)) in definitions.iter().enumerate() {
        let mut seen = BTreeSet::new();
        for reference in find_references(body) {
            let Some(&target) = position.get(reference.as_str()) else {
                return Err(SchemaError::DanglingReference {
                    from: name.clone(),
                    to: reference,
                });
            };
            if target != index && seen.insert(target) {
                dependents[target].insert(index);
                in_degree[index] += 1;
            }
        }
    }

    let mut ready: BinaryHeap<Reverse<usize>> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, degree)| **degree == 0)
        .map(|(i, _)| Reverse(i))
        .collect();

    let mut order = Vec::with_capacity(definitions.len());
    while let Some(Reverse(index)) = ready.pop() {
        order.push(index);
        for &dependent in &dependents[index] {
            in_degree[dependent] -= 1;
            if in_degree[dependent] == 0 {
                ready.push(Reverse(dependent));
            }
        }
    }

    let entries: Vec<(&String, &Value)> = definitions.iter().collect();
    if order.len() != entries.len() {
        let unsorted = in_degree
            .iter()
            .enumerate()
            .filter(|(_, degree)| **degree > 0)
            .map(|(i, _)| entries[i].0.clone())
            .collect();
        return Err(SchemaError::ReferenceCycle {
            definitions: unsorted,
        });
    }

    Ok(order
        .into_iter()
        .map(|i| (entries[i].0.clone(), entries[i].1.clone()))
        .collect())
}
