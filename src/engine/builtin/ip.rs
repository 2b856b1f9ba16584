//! IPv4, IPv6 and ICMP.

use std::net::IpAddr;

use etherparse::{Ipv4HeaderSlice, Ipv6HeaderSlice};
use tracing::trace;

use super::bytes::Reader;
use super::{BuiltinSession, Dissection, transport};
use crate::types::FieldNode;

pub(crate) const IPPROTO_ICMP: u8 = 1;
pub(crate) const IPPROTO_TCP: u8 = 6;
pub(crate) const IPPROTO_UDP: u8 = 17;

fn proto_name(proto: u8) -> &'static str {
    match proto {
        IPPROTO_ICMP => "ICMP",
        IPPROTO_TCP => "TCP",
        IPPROTO_UDP => "UDP",
        58 => "ICMPv6",
        _ => "Unknown",
    }
}

/// Raw IP link types carry no link header; the version nibble picks the protocol.
pub(crate) fn dissect_raw(session: &mut BuiltinSession, pkt: &mut Dissection<'_>, data: &[u8]) {
    match data.first().map(|b| b >> 4) {
        Some(4) => dissect_ipv4(session, pkt, data),
        Some(6) => dissect_ipv6(session, pkt, data),
        _ => pkt.data_layer(data),
    }
}

pub(crate) fn dissect_ipv4(session: &mut BuiltinSession, pkt: &mut Dissection<'_>, data: &[u8]) {
    pkt.note_protocol("ip");
    let ip = match Ipv4HeaderSlice::from_slice(data) {
        Ok(ip) => ip,
        Err(e) => {
            trace!(frame = pkt.frame.number, error = %e, "ipv4 header does not parse");
            pkt.malformed("IPv4");
            return;
        }
    };
    let header_len = ip.slice().len();
    let (src, dst) = (ip.source_addr(), ip.destination_addr());
    let (total_len, id, ttl, proto, checksum) =
        (ip.total_len(), ip.identification(), ip.ttl(), ip.protocol().0, ip.header_checksum());
    let (dscp, ecn) = (ip.dcp().value(), ip.ecn().value());
    let dsfield = (dscp << 2) | ecn;
    let flags = (u8::from(ip.dont_fragment()) << 1) | u8::from(ip.more_fragments());
    let frag_offset = ip.fragments_offset().value() * 8;
    let set = |bit: u8| if flags & bit != 0 { "Set" } else { "Not set" };

    pkt.set_addresses(src, dst);
    pkt.push_layer(
        FieldNode::protocol("ip", format!("Internet Protocol Version 4, Src: {}, Dst: {}", src, dst))
            .with_child(FieldNode::field("ip.version", "Version", 4))
            .with_child(FieldNode::described(
                "ip.hdr_len",
                "Header Length",
                header_len,
                format!("{} bytes ({})", header_len, ip.ihl()),
            ))
            .with_child(
                FieldNode::field("ip.dsfield", "Differentiated Services Field", format!("0x{:02x}", dsfield))
                    .with_child(FieldNode::field("ip.dsfield.dscp", "Differentiated Services Codepoint", dscp))
                    .with_child(FieldNode::field("ip.dsfield.ecn", "Explicit Congestion Notification", ecn)),
            )
            .with_child(FieldNode::field("ip.len", "Total Length", total_len))
            .with_child(FieldNode::described(
                "ip.id",
                "Identification",
                format!("0x{:04x}", id),
                format!("0x{:04x} ({})", id, id),
            ))
            .with_child(
                FieldNode::field("ip.flags", "Flags", format!("0x{:x}", flags))
                    .with_child(FieldNode::described("ip.flags.rb", "Reserved bit", 0, "Not set"))
                    .with_child(FieldNode::described("ip.flags.df", "Don't fragment", (flags >> 1) & 1, set(0b10)))
                    .with_child(FieldNode::described("ip.flags.mf", "More fragments", flags & 1, set(0b01))),
            )
            .with_child(FieldNode::field("ip.frag_offset", "Fragment Offset", frag_offset))
            .with_child(FieldNode::field("ip.ttl", "Time to Live", ttl))
            .with_child(FieldNode::described(
                "ip.proto",
                "Protocol",
                proto,
                format!("{} ({})", proto_name(proto), proto),
            ))
            .with_child(FieldNode::field("ip.checksum", "Header Checksum", format!("0x{:04x}", checksum)))
            .with_child(FieldNode::field("ip.src", "Source Address", src))
            .with_child(FieldNode::field("ip.addr", "Source or Destination Address", src))
            .with_child(FieldNode::field("ip.src_host", "Source Host", src))
            .with_child(FieldNode::field("ip.dst", "Destination Address", dst))
            .with_child(FieldNode::field("ip.addr", "Source or Destination Address", dst))
            .with_child(FieldNode::field("ip.dst_host", "Destination Host", dst)),
    );

    // Trailing link padding is not part of the datagram.
    let end = usize::from(total_len).clamp(header_len, data.len());
    let payload = &data[header_len..end];
    if frag_offset != 0 {
        pkt.data_layer(payload);
        return;
    }
    dispatch_ip_proto(session, pkt, proto, IpAddr::V4(src), IpAddr::V4(dst), payload);
}

pub(crate) fn dissect_ipv6(session: &mut BuiltinSession, pkt: &mut Dissection<'_>, data: &[u8]) {
    pkt.note_protocol("ipv6");
    let ip = match Ipv6HeaderSlice::from_slice(data) {
        Ok(ip) => ip,
        Err(e) => {
            trace!(frame = pkt.frame.number, error = %e, "ipv6 header does not parse");
            pkt.malformed("IPv6");
            return;
        }
    };
    let (src, dst) = (ip.source_addr(), ip.destination_addr());
    let (plen, next, hlim) = (ip.payload_length(), ip.next_header().0, ip.hop_limit());

    pkt.set_addresses(src, dst);
    pkt.push_layer(
        FieldNode::protocol("ipv6", format!("Internet Protocol Version 6, Src: {}, Dst: {}", src, dst))
            .with_child(FieldNode::field("ipv6.version", "Version", 6))
            .with_child(FieldNode::field("ipv6.tclass", "Traffic Class", format!("0x{:02x}", ip.traffic_class())))
            .with_child(FieldNode::field("ipv6.flow", "Flow Label", format!("0x{:05x}", ip.flow_label().value())))
            .with_child(FieldNode::field("ipv6.plen", "Payload Length", plen))
            .with_child(FieldNode::described(
                "ipv6.nxt",
                "Next Header",
                next,
                format!("{} ({})", proto_name(next), next),
            ))
            .with_child(FieldNode::field("ipv6.hlim", "Hop Limit", hlim))
            .with_child(FieldNode::field("ipv6.src", "Source Address", src))
            .with_child(FieldNode::field("ipv6.addr", "Address", src))
            .with_child(FieldNode::field("ipv6.dst", "Destination Address", dst))
            .with_child(FieldNode::field("ipv6.addr", "Address", dst)),
    );

    let rest = &data[ip.slice().len()..];
    let payload = &rest[..usize::from(plen).min(rest.len())];
    dispatch_ip_proto(session, pkt, next, IpAddr::V6(src), IpAddr::V6(dst), payload);
}

fn dispatch_ip_proto(
    session: &mut BuiltinSession,
    pkt: &mut Dissection<'_>,
    proto: u8,
    src: IpAddr,
    dst: IpAddr,
    payload: &[u8],
) {
    match proto {
        IPPROTO_TCP => transport::dissect_tcp(session, pkt, src, dst, payload),
        IPPROTO_UDP => transport::dissect_udp(session, pkt, src, dst, payload),
        IPPROTO_ICMP => dissect_icmp(pkt, payload),
        _ => pkt.data_layer(payload),
    }
}

fn icmp_type_name(icmp_type: u8) -> &'static str {
    match icmp_type {
        0 => "Echo (ping) reply",
        3 => "Destination unreachable",
        5 => "Redirect",
        8 => "Echo (ping) request",
        11 => "Time-to-live exceeded",
        _ => "Unknown",
    }
}

fn dissect_icmp(pkt: &mut Dissection<'_>, data: &[u8]) {
    pkt.note_protocol("icmp");
    let mut r = Reader::new(data);
    let (Some(icmp_type), Some(code), Some(checksum)) = (r.u8(), r.u8(), r.be16()) else {
        pkt.malformed("ICMP");
        return;
    };

    let mut layer = FieldNode::protocol("icmp", "Internet Control Message Protocol")
        .with_child(FieldNode::described(
            "icmp.type",
            "Type",
            icmp_type,
            format!("{} ({})", icmp_type, icmp_type_name(icmp_type)),
        ))
        .with_child(FieldNode::field("icmp.code", "Code", code))
        .with_child(FieldNode::field("icmp.checksum", "Checksum", format!("0x{:04x}", checksum)));

    if matches!(icmp_type, 0 | 8) {
        if let (Some(ident), Some(seq)) = (r.be16(), r.be16()) {
            layer.push(FieldNode::field("icmp.ident", "Identifier (BE)", ident));
            layer.push(FieldNode::field("icmp.seq", "Sequence Number (BE)", seq));
        }
    }
    pkt.push_layer(layer);
    pkt.data_layer(r.rest());
}
