//! Ethernet, 802.1Q and ARP.

use etherparse::Ethernet2HeaderSlice;
use tracing::trace;

use super::bytes::{Reader, format_mac};
use super::{BuiltinSession, Dissection, ip};
use crate::types::FieldNode;

pub(crate) const ETHERTYPE_IPV4: u16 = 0x0800;
pub(crate) const ETHERTYPE_ARP: u16 = 0x0806;
pub(crate) const ETHERTYPE_VLAN: u16 = 0x8100;
pub(crate) const ETHERTYPE_IPV6: u16 = 0x86dd;

fn ethertype_name(ethertype: u16) -> &'static str {
    match ethertype {
        ETHERTYPE_IPV4 => "IPv4",
        ETHERTYPE_ARP => "ARP",
        ETHERTYPE_VLAN => "802.1Q Virtual LAN",
        ETHERTYPE_IPV6 => "IPv6",
        _ => "Unknown",
    }
}

fn ethertype_field(key: &str, ethertype: u16) -> FieldNode {
    FieldNode::described(
        key,
        "Type",
        format!("0x{:04x}", ethertype),
        format!("{} (0x{:04x})", ethertype_name(ethertype), ethertype),
    )
}

fn address_field(key: &str, title: &str, mac: &[u8; 6]) -> FieldNode {
    let shown = format_mac(mac);
    FieldNode::field(key, title, &shown)
        .with_child(FieldNode::field("eth.addr", "Address", &shown))
        .with_child(FieldNode::described(
            "eth.lg",
            "LG bit",
            u8::from(mac[0] & 0x02 != 0),
            if mac[0] & 0x02 != 0 { "Locally administered address" } else { "Globally unique address" },
        ))
        .with_child(FieldNode::described(
            "eth.ig",
            "IG bit",
            u8::from(mac[0] & 0x01 != 0),
            if mac[0] & 0x01 != 0 { "Group address (multicast/broadcast)" } else { "Individual address (unicast)" },
        ))
}

pub(crate) fn dissect_ethernet(session: &mut BuiltinSession, pkt: &mut Dissection<'_>, data: &[u8]) {
    pkt.note_protocol("eth");
    let eth = match Ethernet2HeaderSlice::from_slice(data) {
        Ok(eth) => eth,
        Err(e) => {
            trace!(frame = pkt.frame.number, error = %e, "ethernet header does not parse");
            pkt.malformed("Ethernet");
            return;
        }
    };
    let (src, dst, ethertype) = (eth.source(), eth.destination(), eth.ether_type().0);

    pkt.note_protocol("ethertype");
    pkt.set_hw_addresses(&src, &dst);
    pkt.push_layer(
        FieldNode::protocol(
            "eth",
            format!("Ethernet II, Src: {}, Dst: {}", format_mac(&src), format_mac(&dst)),
        )
        .with_child(address_field("eth.dst", "Destination", &dst))
        .with_child(address_field("eth.src", "Source", &src))
        .with_child(ethertype_field("eth.type", ethertype)),
    );
    dispatch_ethertype(session, pkt, ethertype, &data[eth.slice().len()..]);
}

pub(crate) fn dispatch_ethertype(
    session: &mut BuiltinSession,
    pkt: &mut Dissection<'_>,
    ethertype: u16,
    payload: &[u8],
) {
    match ethertype {
        ETHERTYPE_IPV4 => ip::dissect_ipv4(session, pkt, payload),
        ETHERTYPE_IPV6 => ip::dissect_ipv6(session, pkt, payload),
        ETHERTYPE_ARP => dissect_arp(pkt, payload),
        ETHERTYPE_VLAN => dissect_vlan(session, pkt, payload),
        _ => pkt.data_layer(payload),
    }
}

fn dissect_vlan(session: &mut BuiltinSession, pkt: &mut Dissection<'_>, data: &[u8]) {
    pkt.note_protocol("vlan");
    let mut r = Reader::new(data);
    let (Some(tci), Some(ethertype)) = (r.be16(), r.be16()) else {
        pkt.malformed("802.1Q");
        return;
    };
    let id = tci & 0x0fff;
    pkt.push_layer(
        FieldNode::protocol("vlan", format!("802.1Q Virtual LAN, PRI: {}, ID: {}", tci >> 13, id))
            .with_child(FieldNode::field("vlan.priority", "Priority", tci >> 13))
            .with_child(FieldNode::field("vlan.dei", "DEI", (tci >> 12) & 1))
            .with_child(FieldNode::field("vlan.id", "ID", id))
            .with_child(ethertype_field("vlan.etype", ethertype)),
    );
    dispatch_ethertype(session, pkt, ethertype, r.rest());
}

fn dissect_arp(pkt: &mut Dissection<'_>, data: &[u8]) {
    pkt.note_protocol("arp");
    let mut r = Reader::new(data);
    let header = (r.be16(), r.be16(), r.u8(), r.u8(), r.be16());
    let (Some(hw_type), Some(proto_type), Some(6), Some(4), Some(opcode)) = header else {
        pkt.malformed("ARP");
        return;
    };
    let (Some(sha), Some(spa), Some(tha), Some(tpa)) = (r.mac(), r.ipv4(), r.mac(), r.ipv4()) else {
        pkt.malformed("ARP");
        return;
    };

    let op_name = match opcode {
        1 => "request",
        2 => "reply",
        _ => "unknown",
    };
    pkt.push_layer(
        FieldNode::protocol("arp", format!("Address Resolution Protocol ({})", op_name))
            .with_child(FieldNode::field("arp.hw.type", "Hardware type", hw_type))
            .with_child(FieldNode::described(
                "arp.proto.type",
                "Protocol type",
                format!("0x{:04x}", proto_type),
                format!("{} (0x{:04x})", ethertype_name(proto_type), proto_type),
            ))
            .with_child(FieldNode::field("arp.hw.size", "Hardware size", 6))
            .with_child(FieldNode::field("arp.proto.size", "Protocol size", 4))
            .with_child(FieldNode::described(
                "arp.opcode",
                "Opcode",
                opcode,
                format!("{} ({})", op_name, opcode),
            ))
            .with_child(FieldNode::field("arp.src.hw_mac", "Sender MAC address", format_mac(&sha)))
            .with_child(FieldNode::field("arp.src.proto_ipv4", "Sender IP address", spa))
            .with_child(FieldNode::field("arp.dst.hw_mac", "Target MAC address", format_mac(&tha)))
            .with_child(FieldNode::field("arp.dst.proto_ipv4", "Target IP address", tpa)),
    );
}
