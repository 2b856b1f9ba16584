//! Field tree to JSON conversion.

use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::Result;
use crate::types::{FieldNode, FieldTree};

/// Converts a field tree into the layered JSON document.
pub trait TreeSerializer: Send + Sync {
    fn to_value(&self, tree: &FieldTree, descriptive: bool) -> Map<String, Value>;

    fn to_json(&self, tree: &FieldTree, descriptive: bool) -> Result<String> {
        Ok(serde_json::to_string(&self.to_value(tree, descriptive))?)
    }
}

/// Analyzer-compatible JSON layout.
///
/// Sibling nodes sharing a key are merged into an array. A node with both a
/// value and children writes the value under its key and the children under
/// `<key>_tree`. A node with neither writes an empty string, or its label if
/// it is a protocol node.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonTreeSerializer;

impl TreeSerializer for JsonTreeSerializer {
    fn to_value(&self, tree: &FieldTree, descriptive: bool) -> Map<String, Value> {
        let mut out = Map::new();
        write_nodes(&mut out, &tree.layers, descriptive);
        out
    }
}

fn write_nodes(out: &mut Map<String, Value>, nodes: &[FieldNode], descriptive: bool) {
    for (key, group) in group_by_key(nodes) {
        let has_value = group.iter().any(|node| node.value.is_some());
        let has_children = group.iter().any(|node| !node.children.is_empty());

        if has_value {
            let values = group.iter().map(|node| {
                let shown = if descriptive { node.descriptive_value() } else { node.value.as_deref() };
                shown.map_or_else(|| no_value(node), |shown| Value::String(shown.to_string()))
            });
            out.insert(key.to_string(), single_or_array(values));
        }

        if has_children {
            let name = if has_value { format!("{}_tree", key) } else { key.to_string() };
            let children = group.iter().map(|node| {
                if node.children.is_empty() {
                    no_value(node)
                } else {
                    let mut child = Map::new();
                    write_nodes(&mut child, &node.children, descriptive);
                    Value::Object(child)
                }
            });
            out.insert(name, single_or_array(children));
        }

        if !has_value && !has_children {
            out.insert(key.to_string(), single_or_array(group.iter().map(|node| no_value(node))));
        }
    }
}

/// Groups nodes by key, keeping the order in which keys first appear.
fn group_by_key(nodes: &[FieldNode]) -> Vec<(&str, Vec<&FieldNode>)> {
    let mut groups: Vec<(&str, Vec<&FieldNode>)> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();
    for node in nodes {
        match index.get(node.key.as_str()) {
            Some(&i) => groups[i].1.push(node),
            None => {
                index.insert(node.key.as_str(), groups.len());
                groups.push((node.key.as_str(), vec![node]));
            }
        }
    }
    groups
}

fn no_value(node: &FieldNode) -> Value {
    match (&node.label, node.protocol) {
        (Some(label), true) => Value::String(label.clone()),
        _ => Value::String(String::new()),
    }
}

fn single_or_array(values: impl Iterator<Item = Value>) -> Value {
    let mut values: Vec<Value> = values.collect();
    if values.len() == 1 { values.pop().unwrap_or(Value::Null) } else { Value::Array(values) }
}
