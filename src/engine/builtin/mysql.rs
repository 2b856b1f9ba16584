//! MySQL client/server protocol.
//!
//! Direction decides the packet type: packets to the server with sequence 1
//! are login requests, sequence 0 carries a command. From the server, sequence
//! 0 with protocol byte 10 is the greeting; otherwise the first byte is the
//! response code.

use super::Dissection;
use super::bytes::{Reader, colon_hex};
use crate::types::FieldNode;

pub(crate) const MYSQL_PORT: u16 = 3306;

const CLIENT_CONNECT_WITH_DB: u32 = 0x0000_0008;
const CLIENT_PROTOCOL_41: u32 = 0x0000_0200;
const CLIENT_SSL: u32 = 0x0000_0800;
const CLIENT_SECURE_CONNECTION: u32 = 0x0000_8000;
const CLIENT_PLUGIN_AUTH: u32 = 0x0008_0000;
const CLIENT_PLUGIN_AUTH_LENENC: u32 = 0x0020_0000;

const CAPABILITY_NAMES: [(u32, &str, &str); 6] = [
    (0x0000_0001, "mysql.caps.lp", "Long Password"),
    (CLIENT_CONNECT_WITH_DB, "mysql.caps.cd", "Connect With Database"),
    (CLIENT_PROTOCOL_41, "mysql.caps.cu", "Speaks 4.1 protocol (new flag)"),
    (CLIENT_SSL, "mysql.caps.sl", "Switch to SSL after handshake"),
    (CLIENT_SECURE_CONNECTION, "mysql.caps.sc", "Can do 4.1 authentication"),
    (CLIENT_PLUGIN_AUTH, "mysql.caps.pa", "Plugin authentication"),
];

fn charset_name(id: u8) -> &'static str {
    match id {
        8 => "latin1 COLLATE latin1_swedish_ci",
        33 => "utf8 COLLATE utf8_general_ci",
        45 => "utf8mb4 COLLATE utf8mb4_general_ci",
        63 => "binary COLLATE binary",
        255 => "utf8mb4 COLLATE utf8mb4_0900_ai_ci",
        _ => "Unknown",
    }
}

fn command_name(cmd: u8) -> &'static str {
    match cmd {
        0x01 => "Quit",
        0x02 => "Use Database",
        0x03 => "Query",
        0x04 => "Show Fields",
        0x0e => "Ping",
        0x16 => "Prepare Statement",
        0x17 => "Execute Statement",
        0x19 => "Close Statement",
        _ => "Unknown",
    }
}

fn text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

pub(crate) fn dissect(pkt: &mut Dissection<'_>, payload: &[u8], to_server: bool) {
    pkt.note_protocol("mysql");
    let mut layer = FieldNode::protocol("mysql", "MySQL Protocol");
    let mut r = Reader::new(payload);
    let mut info = Vec::new();

    while r.remaining() >= 4 {
        let (Some(length), Some(number)) = (r.le24(), r.u8()) else { break };
        let body_len = (length as usize).min(r.remaining());
        let Some(body) = r.take(body_len) else { break };

        layer.push(FieldNode::field("mysql.packet_length", "Packet Length", length));
        layer.push(FieldNode::field("mysql.packet_number", "Packet Number", number));

        match (to_server, number) {
            (true, 1) if body.len() > 32 => {
                let login = login_request(body);
                info.push(match login.find("mysql.user").and_then(|n| n.value.as_deref()) {
                    Some(user) => format!("Login Request user={}", user),
                    None => "Login Request".to_string(),
                });
                layer.push(login);
            }
            (true, 0) => {
                command(&mut layer, body);
                if let Some(&cmd) = body.first() {
                    info.push(format!("Request {}", command_name(cmd)));
                }
            }
            (false, 0) if body.first() == Some(&10) => {
                info.push("Server Greeting".to_string());
                layer.push(greeting(body));
            }
            (false, _) => {
                info.push(match body.first() {
                    Some(0x00) => "Response OK".to_string(),
                    Some(0xff) => "Response Error".to_string(),
                    _ => "Response".to_string(),
                });
                response(&mut layer, body);
            }
            _ => {
                layer.push(FieldNode::field("mysql.payload", "Payload", colon_hex(body)));
            }
        }
    }

    pkt.summarize("MySQL", info.join(" "));
    pkt.push_layer(layer);
}

fn capabilities(key: &str, title: &str, caps: u32) -> FieldNode {
    let mut node = FieldNode::field(key, title, format!("0x{:04x}", caps & 0xffff));
    for (bit, flag_key, flag_title) in CAPABILITY_NAMES {
        let set = caps & bit != 0;
        node.push(FieldNode::described(flag_key, flag_title, u8::from(set), if set { "Set" } else { "Not set" }));
    }
    node
}

fn login_request(body: &[u8]) -> FieldNode {
    let mut node = FieldNode::subtree("mysql.login_request", "Login Request");
    let mut r = Reader::new(body);
    let (Some(caps), Some(max_packet), Some(charset)) = (r.le32(), r.le32(), r.u8()) else {
        return node;
    };
    node.push(capabilities("mysql.caps.client", "Client Capabilities", caps));
    node.push(FieldNode::field("mysql.extcaps.client", "Extended Client Capabilities", format!("0x{:04x}", caps >> 16)));
    node.push(FieldNode::field("mysql.max_packet", "MAX Packet", max_packet));
    node.push(FieldNode::described(
        "mysql.charset",
        "Charset",
        charset,
        format!("{} ({})", charset_name(charset), charset),
    ));
    if r.skip(23).is_none() {
        return node;
    }
    if let Some(user) = r.cstr() {
        node.push(FieldNode::field("mysql.user", "Username", text(user)));
    }

    let auth = if caps & CLIENT_PLUGIN_AUTH_LENENC != 0 || caps & CLIENT_SECURE_CONNECTION != 0 {
        r.u8().and_then(|len| r.take(usize::from(len)))
    } else {
        r.cstr()
    };
    if let Some(auth) = auth {
        node.push(FieldNode::field("mysql.passwd", "Password", colon_hex(auth)));
    }
    if caps & CLIENT_CONNECT_WITH_DB != 0 {
        if let Some(schema) = r.cstr() {
            node.push(FieldNode::field("mysql.schema", "Schema", text(schema)));
        }
    }
    if caps & CLIENT_PLUGIN_AUTH != 0 {
        if let Some(plugin) = r.cstr() {
            node.push(FieldNode::field("mysql.client_auth_plugin", "Client Auth Plugin", text(plugin)));
        }
    }
    node
}

fn greeting(body: &[u8]) -> FieldNode {
    let mut node = FieldNode::subtree("mysql.server_greeting", "Server Greeting");
    let mut r = Reader::new(body);
    let Some(protocol) = r.u8() else { return node };
    node.push(FieldNode::field("mysql.protocol", "Protocol", protocol));
    if let Some(version) = r.cstr() {
        node.push(FieldNode::field("mysql.version", "Version", text(version)));
    }
    if let Some(thread) = r.le32() {
        node.push(FieldNode::field("mysql.thread_id", "Thread ID", thread));
    }
    if let Some(salt) = r.cstr() {
        node.push(FieldNode::field("mysql.salt", "Salt", text(salt)));
    }
    if let Some(caps) = r.le16() {
        node.push(capabilities("mysql.caps.server", "Server Capabilities", u32::from(caps)));
    }
    if let Some(charset) = r.u8() {
        node.push(FieldNode::described(
            "mysql.server_language",
            "Server Language",
            charset,
            format!("{} ({})", charset_name(charset), charset),
        ));
    }
    if let Some(status) = r.le16() {
        node.push(FieldNode::field("mysql.server_status", "Server Status", format!("0x{:04x}", status)));
    }
    node
}

fn command(layer: &mut FieldNode, body: &[u8]) {
    let mut r = Reader::new(body);
    let Some(cmd) = r.u8() else { return };
    layer.push(FieldNode::described(
        "mysql.command",
        "Command",
        cmd,
        format!("{} ({})", command_name(cmd), cmd),
    ));
    match cmd {
        0x03 => {
            layer.push(FieldNode::field("mysql.query", "Statement", text(r.rest())));
        }
        0x02 => {
            layer.push(FieldNode::field("mysql.schema", "Schema", text(r.rest())));
        }
        _ => {}
    }
}

fn response(layer: &mut FieldNode, body: &[u8]) {
    let mut r = Reader::new(body);
    let Some(code) = r.u8() else { return };
    let kind = match code {
        0x00 => "OK Packet",
        0xff => "ERR Packet",
        0xfe if body.len() < 9 => "EOF Packet",
        _ => {
            layer.push(FieldNode::field("mysql.payload", "Payload", colon_hex(body)));
            return;
        }
    };
    layer.push(FieldNode::described(
        "mysql.response_code",
        "Response Code",
        format!("0x{:02x}", code),
        format!("{} (0x{:02x})", kind, code),
    ));
    if code == 0xff {
        if let Some(errno) = r.le16() {
            layer.push(FieldNode::field("mysql.error_code", "Error Code", errno));
        }
        if r.rest().first() == Some(&b'#') {
            r.skip(1);
            if let Some(state) = r.take(5) {
                layer.push(FieldNode::field("mysql.sqlstate", "SQL state", text(state)));
            }
        }
        layer.push(FieldNode::field("mysql.error.message", "Error message", text(r.rest())));
    }
}
