//! Field trees produced by the engine and the owned results handed to callers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

use super::HexDump;

/// One node of a dissected field tree.
///
/// `key` is the filter-style field name (`tcp.dstport`). `value` is the raw
/// display value, `label` the full human-readable line (`Destination Port: 3306`).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FieldNode {
    pub key: String,
    pub value: Option<String>,
    pub label: Option<String>,
    /// Protocol nodes render their label when they carry no value or children.
    pub protocol: bool,
    pub children: Vec<FieldNode>,
}

impl FieldNode {
    /// A protocol layer node (`eth`, `ip`, `tcp`).
    pub fn protocol(key: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: None,
            label: Some(label.into()),
            protocol: true,
            children: Vec::new(),
        }
    }

    /// A leaf field whose label is `title: value`.
    pub fn field(key: impl Into<String>, title: &str, value: impl ToString) -> Self {
        let value = value.to_string();
        Self {
            key: key.into(),
            label: Some(format!("{}: {}", title, value)),
            value: Some(value),
            protocol: false,
            children: Vec::new(),
        }
    }

    /// A leaf field with a raw value and a separately rendered description.
    pub fn described(
        key: impl Into<String>,
        title: &str,
        value: impl ToString,
        description: impl std::fmt::Display,
    ) -> Self {
        Self {
            key: key.into(),
            value: Some(value.to_string()),
            label: Some(format!("{}: {}", title, description)),
            protocol: false,
            children: Vec::new(),
        }
    }

    /// A text-only node that groups children without carrying a value.
    pub fn subtree(key: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: None,
            label: Some(label.into()),
            protocol: false,
            children: Vec::new(),
        }
    }

    pub fn with_child(mut self, child: FieldNode) -> Self {
        self.children.push(child);
        self
    }

    pub fn push(&mut self, child: FieldNode) -> &mut Self {
        self.children.push(child);
        self
    }

    /// The value shown in descriptive mode: the label text after `": "`,
    /// falling back to the raw value.
    pub fn descriptive_value(&self) -> Option<&str> {
        let raw = self.value.as_deref()?;
        Some(
            self.label
                .as_deref()
                .and_then(|label| label.split_once(": ").map(|(_, shown)| shown))
                .unwrap_or(raw),
        )
    }

    /// Depth-first search for the first node with `key`.
    pub fn find(&self, key: &str) -> Option<&FieldNode> {
        if self.key == key {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(key))
    }
}

/// The complete tree for one frame, one root per protocol layer.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FieldTree {
    pub layers: Vec<FieldNode>,
}

impl FieldTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, layer: FieldNode) {
        self.layers.push(layer);
    }

    pub fn find(&self, key: &str) -> Option<&FieldNode> {
        self.layers.iter().find_map(|layer| layer.find(key))
    }

    /// Protocol keys in dissection order, e.g. `["frame", "eth", "ip", "tcp"]`.
    pub fn protocols(&self) -> impl Iterator<Item = &str> {
        self.layers.iter().map(|layer| layer.key.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LayerDocument {
    pub layers: Map<String, Value>,
}

/// Fully owned dissection output for one frame.
///
/// Serializes to the analyzer document layout: `_index`, the hex dump
/// columns, and `_source.layers`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DissectionResult {
    #[serde(rename = "_number")]
    pub number: u64,
    #[serde(rename = "_index")]
    pub index: String,
    #[serde(flatten)]
    pub hex: HexDump,
    #[serde(rename = "_source")]
    pub source: LayerDocument,
}

impl DissectionResult {
    pub fn new(number: u64, timestamp: Duration, hex: HexDump, layers: Map<String, Value>) -> Self {
        Self { number, index: index_name(timestamp), hex, source: LayerDocument { layers } }
    }

    pub fn layers(&self) -> &Map<String, Value> {
        &self.source.layers
    }

    pub fn layer(&self, name: &str) -> Option<&Value> {
        self.source.layers.get(name)
    }

    /// Looks up a field by its key anywhere under the layer it belongs to.
    ///
    /// The layer is the longest layer name that prefixes the key at a dot
    /// boundary (`tcp.dstport` lives under `tcp`, `_ws.col.info` under
    /// `_ws.col`). Subtrees are searched depth-first.
    pub fn field(&self, key: &str) -> Option<&Value> {
        let layer = key
            .match_indices('.')
            .map(|(at, _)| &key[..at])
            .filter(|prefix| self.source.layers.contains_key(*prefix))
            .last()?;
        find_key(self.layer(layer)?, key)
    }

    /// String form of a field, or the first entry when it repeats.
    pub fn field_str(&self, key: &str) -> Option<&str> {
        match self.field(key)? {
            Value::String(s) => Some(s),
            Value::Array(items) => items.first().and_then(Value::as_str),
            _ => None,
        }
    }
}

fn find_key<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    match value {
        Value::Object(map) => {
            map.get(key).or_else(|| map.values().find_map(|child| find_key(child, key)))
        }
        Value::Array(items) => items.iter().find_map(|item| find_key(item, key)),
        _ => None,
    }
}

/// Capture timestamp as a UTC date-time. Out-of-range values clamp to the epoch.
pub fn capture_time(timestamp: Duration) -> DateTime<Utc> {
    i64::try_from(timestamp.as_secs())
        .ok()
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, timestamp.subsec_nanos()))
        .unwrap_or_default()
}

/// `packets-YYYY-MM-DD` for the capture day, in UTC.
fn index_name(timestamp: Duration) -> String {
    capture_time(timestamp).format("packets-%Y-%m-%d").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn descriptive_value_uses_label_suffix() {
        let node = FieldNode::described("eth.type", "Type", "0x0800", "IPv4 (0x0800)");
        assert_eq!(node.value.as_deref(), Some("0x0800"));
        assert_eq!(node.descriptive_value(), Some("IPv4 (0x0800)"));

        let subtree = FieldNode::subtree("mysql.login_request", "Login Request");
        assert_eq!(subtree.descriptive_value(), None);
    }

    #[test]
    fn find_searches_nested_nodes() {
        let tree = FieldTree {
            layers: vec![FieldNode::protocol("mysql", "MySQL Protocol").with_child(
                FieldNode::subtree("mysql.login_request", "Login Request")
                    .with_child(FieldNode::field("mysql.user", "Username", "root")),
            )],
        };
        assert_eq!(tree.find("mysql.user").and_then(|n| n.value.as_deref()), Some("root"));
        assert_eq!(tree.protocols().collect::<Vec<_>>(), vec!["mysql"]);
    }

    #[test]
    fn index_name_uses_capture_day() {
        // 2021-03-04T05:06:07Z
        assert_eq!(index_name(Duration::from_secs(1_614_834_367)), "packets-2021-03-04");
        assert_eq!(index_name(Duration::ZERO), "packets-1970-01-01");
        // Last nanosecond of a leap day.
        assert_eq!(index_name(Duration::new(1_709_251_199, 999_999_999)), "packets-2024-02-29");
        assert_eq!(index_name(Duration::from_secs(1_709_251_200)), "packets-2024-03-01");
        assert_eq!(index_name(Duration::from_secs(u64::MAX)), "packets-1970-01-01");
    }

    #[test]
    fn result_serializes_in_document_layout() {
        let mut layers = Map::new();
        layers.insert("tcp".into(), json!({ "tcp.dstport": "3306" }));
        let result = DissectionResult::new(7, Duration::ZERO, HexDump::from_bytes(b"abc"), layers);

        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["_source"]["layers"]["tcp"]["tcp.dstport"], "3306");
        assert_eq!(value["offset"][0], "0000");
        assert_eq!(value["ascii"][0], "abc");
        assert_eq!(result.field_str("tcp.dstport"), Some("3306"));

        let back: DissectionResult = serde_json::from_value(value).unwrap();
        assert_eq!(back, result);
    }
}
