//! Typed views of common layers in a dissection result.
//!
//! Layer documents carry every value as a string, the way analyzers export
//! them. These structs pick out the fields most callers need; numeric
//! accessors parse on demand and return `None` for absent or non-numeric
//! values. A [`ParserRegistry`] maps protocol names to parsers so callers can
//! add their own layer decoders next to the built-in ones.
//!
//! ```rust,no_run
//! use tracewire::layers::{Layer, TcpLayer};
//! # fn demo(result: &tracewire::DissectionResult) -> tracewire::Result<()> {
//! if let Some(tcp) = TcpLayer::from_result(result)? {
//!     println!("{:?} -> {:?}", tcp.src_port(), tcp.dst_port());
//! }
//! # Ok(())
//! # }
//! ```

mod app;
mod net;
mod parsers;

pub use self::app::{DnsAnswer, DnsLayer, DnsQuery, HttpLayer};
pub use self::net::{EthLayer, FrameLayer, IpLayer, TcpLayer, UdpLayer, WsColLayer};
pub use self::parsers::{LayerParser, ParserRegistry, ProtocolParser};

use serde::de::{DeserializeOwned, Deserializer, Error as _};
use serde::Deserialize;
use serde_json::Value;
use std::str::FromStr;

use crate::types::DissectionResult;
use crate::{DissectError, Result};

/// A layer that can be read out of a [`DissectionResult`].
pub trait Layer: DeserializeOwned {
    /// Key of the layer in `_source.layers`.
    const NAME: &'static str;

    /// Deserialize this layer, or `None` if the frame does not carry it.
    ///
    /// A layer whose fields have an unexpected shape is a frame error.
    fn from_result(result: &DissectionResult) -> Result<Option<Self>> {
        result
            .layer(Self::NAME)
            .map(|value| {
                Self::deserialize(value).map_err(|e| {
                    DissectError::frame(result.number, format!("{} layer does not decode: {}", Self::NAME, e))
                })
            })
            .transpose()
    }
}

fn parse<T: FromStr>(value: &Option<String>) -> Option<T> {
    value.as_deref().and_then(|v| v.parse().ok())
}

/// Repeated keys serialize as arrays; a single occurrence as a plain string.
fn one_or_many<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Vec<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }
    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        Some(OneOrMany::One(value)) => vec![value],
        Some(OneOrMany::Many(values)) => values,
        None => Vec::new(),
    })
}

/// Entries of a subtree keyed by their summary line, in document order.
fn subtree_entries<'de, D, T>(deserializer: D) -> std::result::Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let entries = serde_json::Map::<String, Value>::deserialize(deserializer)?;
    let mut out = Vec::with_capacity(entries.len());
    for (_, entry) in entries {
        // Two entries with the same summary line merge into an array.
        let items = match entry {
            Value::Array(items) => items,
            other => vec![other],
        };
        for item in items {
            out.push(T::deserialize(item).map_err(D::Error::custom)?);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Options;
    use crate::engine::BuiltinDissector;
    use crate::pipeline::Pipeline;
    use crate::registry::{SessionKey, SessionRegistry};
    use crate::session::SessionConfig;
    use crate::test_utils::{
        DNS_SERVER, ScriptedSource, dns_response, http_session_capture, mysql_login_frame, raw_packet, scripted_opener,
        udp_frame,
    };
    use crate::types::HexDump;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn dissect_all(frames: &[&[u8]]) -> Vec<DissectionResult> {
        let registry = Arc::new(SessionRegistry::new());
        let opener = scripted_opener(|| ScriptedSource::end(vec![]));
        let mut session = registry
            .open(SessionKey::device("lo"), SessionConfig::new(Options::new()), &Arc::new(BuiltinDissector::new()), &opener)
            .unwrap();
        frames
            .iter()
            .enumerate()
            .map(|(i, frame)| {
                let packet = raw_packet(i as u64 + 1, frame);
                Pipeline::default().dissect(&mut session, packet).unwrap().into_result().unwrap()
            })
            .collect()
    }

    fn dissect(frame: &[u8]) -> DissectionResult {
        dissect_all(&[frame]).remove(0)
    }

    #[test]
    fn tcp_and_ip_layers_parse() {
        let result = dissect(&mysql_login_frame());

        let frame = FrameLayer::from_result(&result).unwrap().unwrap();
        assert_eq!(frame.number(), Some(1));
        assert_eq!(frame.len(), Some(155));
        assert_eq!(frame.protocols(), vec!["frame", "eth", "ethertype", "ip", "tcp", "mysql"]);

        let ip = IpLayer::from_result(&result).unwrap().unwrap();
        assert_eq!(ip.src_addr(), Some("10.211.55.3".parse().unwrap()));
        assert_eq!(ip.proto(), Some(6));

        let tcp = TcpLayer::from_result(&result).unwrap().unwrap();
        assert_eq!(tcp.dst_port(), Some(3306));
        assert_eq!(tcp.src_port(), Some(52094));
        assert_eq!(tcp.len(), Some(89));

        assert!(UdpLayer::from_result(&result).unwrap().is_none());
    }

    #[test]
    fn udp_layer_parses() {
        let result = dissect(&udp_frame(([10, 0, 0, 1], 5353), ([10, 0, 0, 2], 6000), b"abcd"));
        let udp = UdpLayer::from_result(&result).unwrap().unwrap();
        assert_eq!((udp.src_port(), udp.dst_port(), udp.length()), (Some(5353), Some(6000), Some(12)));
        assert!(EthLayer::from_result(&result).unwrap().unwrap().src.is_some());
    }

    #[test]
    fn http_layers_pair_request_and_response() {
        let capture = http_session_capture();
        let frames: Vec<&[u8]> = capture.records().iter().map(|r| r.data.as_slice()).collect();
        let results = dissect_all(&frames);

        let request = HttpLayer::from_result(&results[3]).unwrap().unwrap();
        assert!(request.is_request());
        assert_eq!(request.host.as_deref(), Some("example.com"));
        assert_eq!(request.request_lines.len(), 3);

        let response = HttpLayer::from_result(&results[4]).unwrap().unwrap();
        assert!(response.is_response());
        assert_eq!(response.request_in(), Some(4));
        assert_eq!(response.content_length(), Some(13));
        assert_eq!(response.server.as_deref(), Some("nginx"));
        assert_eq!(response.response_lines, vec!["Server: nginx\r\n", "Content-Type: text/html\r\n", "Content-Length: 13\r\n"]);

        let columns = WsColLayer::from_result(&results[4]).unwrap().unwrap();
        assert_eq!(columns.protocol.as_deref(), Some("HTTP"));
        assert_eq!(columns.number(), Some(5));
        assert_eq!(columns.info.as_deref(), Some("HTTP/1.1 200 OK  (text/html)"));
    }

    #[test]
    fn dns_layer_lists_queries_and_answers() {
        let payload = dns_response(0x1003, "host-03.example.com", &[[10, 211, 55, 40], [10, 211, 55, 41]], 60);
        let result = dissect(&udp_frame(DNS_SERVER, ([10, 211, 55, 3], 40003), &payload));

        let dns = DnsLayer::from_result(&result).unwrap().unwrap();
        assert_eq!(dns.id(), Some(0x1003));
        assert!(dns.is_response());
        assert_eq!((dns.queries_count(), dns.answers_count()), (Some(1), Some(2)));
        assert_eq!(dns.queries[0].name.as_deref(), Some("host-03.example.com"));
        let addrs: Vec<_> = dns.answers.iter().filter_map(|a| a.a.as_deref()).collect();
        assert_eq!(addrs, vec!["10.211.55.40", "10.211.55.41"]);
        assert_eq!(dns.answers[1].ttl(), Some(60));
    }

    #[test]
    fn misshapen_layer_is_a_frame_error() {
        let Value::Object(layers) = json!({"tcp": {"tcp.srcport": {"nested": "1"}}}) else { unreachable!() };
        let result = DissectionResult::new(42, Duration::ZERO, HexDump::from_bytes(b"x"), layers);

        let err = TcpLayer::from_result(&result).unwrap_err();
        assert!(matches!(err, crate::DissectError::Frame { number: 42, .. }));
        assert!(err.is_frame_local());
        assert!(err.to_string().contains("tcp layer does not decode"));
    }
}
