//! Link, network and transport layers plus the packet-list columns.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;

use super::{Layer, parse};

/// Capture metadata of the frame.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameLayer {
    #[serde(rename = "frame.number")]
    pub number: Option<String>,
    #[serde(rename = "frame.time")]
    pub time: Option<String>,
    #[serde(rename = "frame.time_epoch")]
    pub time_epoch: Option<String>,
    #[serde(rename = "frame.time_relative")]
    pub time_relative: Option<String>,
    #[serde(rename = "frame.len")]
    pub len: Option<String>,
    #[serde(rename = "frame.cap_len")]
    pub cap_len: Option<String>,
    #[serde(rename = "frame.offset")]
    pub offset: Option<String>,
    #[serde(rename = "frame.protocols")]
    pub protocols: Option<String>,
}

impl Layer for FrameLayer {
    const NAME: &'static str = "frame";
}

impl FrameLayer {
    pub fn number(&self) -> Option<u64> {
        parse(&self.number)
    }

    pub fn len(&self) -> Option<u32> {
        parse(&self.len)
    }

    pub fn cap_len(&self) -> Option<u32> {
        parse(&self.cap_len)
    }

    pub fn offset(&self) -> Option<u64> {
        parse(&self.offset)
    }

    /// Protocol stack, outermost first.
    pub fn protocols(&self) -> Vec<&str> {
        self.protocols.as_deref().map(|p| p.split(':').collect()).unwrap_or_default()
    }
}

/// Ethernet II header.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EthLayer {
    #[serde(rename = "eth.dst")]
    pub dst: Option<String>,
    #[serde(rename = "eth.src")]
    pub src: Option<String>,
    #[serde(rename = "eth.type")]
    pub eth_type: Option<String>,
}

impl Layer for EthLayer {
    const NAME: &'static str = "eth";
}

/// IPv4 header.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IpLayer {
    #[serde(rename = "ip.src")]
    pub src: Option<String>,
    #[serde(rename = "ip.dst")]
    pub dst: Option<String>,
    #[serde(rename = "ip.proto")]
    pub proto: Option<String>,
    #[serde(rename = "ip.ttl")]
    pub ttl: Option<String>,
    #[serde(rename = "ip.len")]
    pub len: Option<String>,
    #[serde(rename = "ip.id")]
    pub id: Option<String>,
}

impl Layer for IpLayer {
    const NAME: &'static str = "ip";
}

impl IpLayer {
    pub fn src_addr(&self) -> Option<IpAddr> {
        parse(&self.src)
    }

    pub fn dst_addr(&self) -> Option<IpAddr> {
        parse(&self.dst)
    }

    /// IP protocol number. Only the raw form parses; descriptive output such
    /// as `TCP (6)` yields `None`.
    pub fn proto(&self) -> Option<u8> {
        parse(&self.proto)
    }

    pub fn ttl(&self) -> Option<u8> {
        parse(&self.ttl)
    }
}

/// TCP header and per-session sequence analysis.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TcpLayer {
    #[serde(rename = "tcp.srcport")]
    pub srcport: Option<String>,
    #[serde(rename = "tcp.dstport")]
    pub dstport: Option<String>,
    #[serde(rename = "tcp.stream")]
    pub stream: Option<String>,
    #[serde(rename = "tcp.len")]
    pub len: Option<String>,
    #[serde(rename = "tcp.seq")]
    pub seq: Option<String>,
    #[serde(rename = "tcp.seq_raw")]
    pub seq_raw: Option<String>,
    #[serde(rename = "tcp.ack")]
    pub ack: Option<String>,
    #[serde(rename = "tcp.flags")]
    pub flags: Option<String>,
    #[serde(rename = "tcp.payload")]
    pub payload: Option<String>,
}

impl Layer for TcpLayer {
    const NAME: &'static str = "tcp";
}

impl TcpLayer {
    pub fn src_port(&self) -> Option<u16> {
        parse(&self.srcport)
    }

    pub fn dst_port(&self) -> Option<u16> {
        parse(&self.dstport)
    }

    pub fn stream(&self) -> Option<u32> {
        parse(&self.stream)
    }

    /// Sequence number relative to the first one seen in this direction.
    pub fn seq(&self) -> Option<u32> {
        parse(&self.seq)
    }

    pub fn seq_raw(&self) -> Option<u32> {
        parse(&self.seq_raw)
    }

    pub fn len(&self) -> Option<u32> {
        parse(&self.len)
    }
}

/// UDP header.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UdpLayer {
    #[serde(rename = "udp.srcport")]
    pub srcport: Option<String>,
    #[serde(rename = "udp.dstport")]
    pub dstport: Option<String>,
    #[serde(rename = "udp.length")]
    pub length: Option<String>,
    #[serde(rename = "udp.stream")]
    pub stream: Option<String>,
}

impl Layer for UdpLayer {
    const NAME: &'static str = "udp";
}

impl UdpLayer {
    pub fn src_port(&self) -> Option<u16> {
        parse(&self.srcport)
    }

    pub fn dst_port(&self) -> Option<u16> {
        parse(&self.dstport)
    }

    pub fn length(&self) -> Option<u16> {
        parse(&self.length)
    }
}


/// Packet-list summary columns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WsColLayer {
    #[serde(rename = "_ws.col.number")]
    pub number: Option<String>,
    #[serde(rename = "_ws.col.def_src")]
    pub def_src: Option<String>,
    #[serde(rename = "_ws.col.def_dst")]
    pub def_dst: Option<String>,
    #[serde(rename = "_ws.col.protocol")]
    pub protocol: Option<String>,
    #[serde(rename = "_ws.col.packet_length")]
    pub packet_length: Option<String>,
    #[serde(rename = "_ws.col.info")]
    pub info: Option<String>,
}

impl Layer for WsColLayer {
    const NAME: &'static str = "_ws.col";
}

impl WsColLayer {
    pub fn number(&self) -> Option<u64> {
        parse(&self.number)
    }

    pub fn packet_length(&self) -> Option<u32> {
        parse(&self.packet_length)
    }
}
