//! Protocol parsers looked up by layer name.

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::debug;

use super::{DnsLayer, EthLayer, FrameLayer, HttpLayer, IpLayer, Layer, TcpLayer, UdpLayer, WsColLayer};
use crate::types::DissectionResult;
use crate::{DissectError, Result};

/// Decodes one protocol out of a dissection result.
pub trait ProtocolParser: Send + Sync {
    fn parse(&self, result: &DissectionResult) -> Result<Value>;
}

impl<F> ProtocolParser for F
where
    F: Fn(&DissectionResult) -> Result<Value> + Send + Sync,
{
    fn parse(&self, result: &DissectionResult) -> Result<Value> {
        self(result)
    }
}

/// Parser backed by a typed [`Layer`]; yields the layer's fields as JSON.
pub struct LayerParser<L>(PhantomData<fn() -> L>);

impl<L> LayerParser<L> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<L> Default for LayerParser<L> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L: Layer + Serialize> ProtocolParser for LayerParser<L> {
    fn parse(&self, result: &DissectionResult) -> Result<Value> {
        match L::from_result(result)? {
            Some(layer) => Ok(serde_json::to_value(layer)?),
            None => Err(DissectError::LayerMissing { number: result.number, layer: L::NAME.to_string() }),
        }
    }
}

/// Registered protocol parsers keyed by layer name.
///
/// ```rust
/// use tracewire::layers::ParserRegistry;
///
/// let registry = ParserRegistry::with_builtin_layers();
/// assert!(registry.get_parser("http").is_ok());
/// assert!(registry.get_parser("sip").is_err());
/// ```
#[derive(Clone, Default)]
pub struct ParserRegistry {
    parsers: HashMap<String, Arc<dyn ProtocolParser>>,
}

impl std::fmt::Debug for ParserRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParserRegistry").field("protocols", &self.protocols()).finish()
    }
}

impl ParserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with a parser for every typed layer in this module.
    pub fn with_builtin_layers() -> Self {
        let mut registry = Self::new();
        registry.register_layer::<FrameLayer>();
        registry.register_layer::<WsColLayer>();
        registry.register_layer::<EthLayer>();
        registry.register_layer::<IpLayer>();
        registry.register_layer::<TcpLayer>();
        registry.register_layer::<UdpLayer>();
        registry.register_layer::<HttpLayer>();
        registry.register_layer::<DnsLayer>();
        registry
    }

    /// Register `parser` for `protocol`, returning the parser it replaces.
    pub fn register(
        &mut self,
        protocol: impl Into<String>,
        parser: impl ProtocolParser + 'static,
    ) -> Option<Arc<dyn ProtocolParser>> {
        let protocol = protocol.into();
        debug!(protocol = %protocol, "protocol parser registered");
        self.parsers.insert(protocol, Arc::new(parser))
    }

    /// Register the typed layer `L` under its layer name.
    pub fn register_layer<L: Layer + Serialize + 'static>(&mut self) -> Option<Arc<dyn ProtocolParser>> {
        self.register(L::NAME, LayerParser::<L>::new())
    }

    pub fn get_parser(&self, protocol: &str) -> Result<Arc<dyn ProtocolParser>> {
        self.parsers
            .get(protocol)
            .cloned()
            .ok_or_else(|| DissectError::ParserNotFound { protocol: protocol.to_string() })
    }

    pub fn parse_protocol(&self, protocol: &str, result: &DissectionResult) -> Result<Value> {
        self.get_parser(protocol)?.parse(result)
    }

    /// Run every registered parser whose layer the frame carries.
    pub fn parse_all(&self, result: &DissectionResult) -> Result<Map<String, Value>> {
        let mut out = Map::new();
        for protocol in self.protocols() {
            if result.layer(protocol).is_some() {
                out.insert(protocol.to_string(), self.parse_protocol(protocol, result)?);
            }
        }
        Ok(out)
    }

    /// Registered protocol names, sorted.
    pub fn protocols(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.parsers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::HexDump;
    use serde_json::json;
    use std::time::Duration;

    fn result(layers: Value) -> DissectionResult {
        let Value::Object(layers) = layers else { panic!("layers must be an object") };
        DissectionResult::new(9, Duration::from_secs(1), HexDump::from_bytes(b"x"), layers)
    }

    #[test]
    fn builtin_layers_parse_by_name() {
        let registry = ParserRegistry::with_builtin_layers();
        let frame = result(json!({
            "frame": {"frame.number": "9"},
            "udp": {"udp.srcport": "53", "udp.dstport": "40001", "udp.length": "40"},
        }));

        let udp = registry.parse_protocol("udp", &frame).unwrap();
        assert_eq!(udp["udp.srcport"], "53");

        let all = registry.parse_all(&frame).unwrap();
        assert_eq!(all.keys().collect::<Vec<_>>(), vec!["frame", "udp"]);
    }

    #[test]
    fn unknown_protocol_is_reported() {
        let registry = ParserRegistry::with_builtin_layers();
        let err = registry.parse_protocol("sip", &result(json!({}))).unwrap_err();
        assert!(matches!(err, DissectError::ParserNotFound { ref protocol } if protocol == "sip"));
    }

    #[test]
    fn registered_layer_missing_from_frame() {
        let registry = ParserRegistry::with_builtin_layers();
        let err = registry.parse_protocol("dns", &result(json!({"frame": {}}))).unwrap_err();
        assert!(matches!(err, DissectError::LayerMissing { number: 9, .. }));
    }

    #[test]
    fn custom_parser_replaces_and_is_returned() {
        let mut registry = ParserRegistry::new();
        let first = registry.register("custom", |r: &DissectionResult| -> Result<Value> { Ok(json!(r.number)) });
        assert!(first.is_none());
        let replaced = registry.register("custom", |_: &DissectionResult| -> Result<Value> { Ok(json!("second")) });
        assert!(replaced.is_some());

        let value = registry.parse_protocol("custom", &result(json!({}))).unwrap();
        assert_eq!(value, json!("second"));
        assert_eq!(registry.protocols(), vec!["custom"]);
    }

    #[test]
    fn parser_errors_propagate() {
        let mut registry = ParserRegistry::new();
        registry.register("strict", |r: &DissectionResult| -> Result<Value> {
            Err(DissectError::frame(r.number, "unsupported"))
        });
        let err = registry.parse_protocol("strict", &result(json!({}))).unwrap_err();
        assert!(err.is_frame_local());
    }
}
