//! HTTP/1.x requests and responses on well-known ports.
//!
//! Only messages that start in the segment are decoded; bodies split across
//! segments are shown up to the end of the segment. Requests are remembered
//! per TCP stream so a response can name the frame that asked for it.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use super::{BuiltinSession, Dissection, format_seconds};
use crate::types::FieldNode;

const HTTP_PORTS: [u16; 3] = [80, 8000, 8080];
const MAX_HEADERS: usize = 64;

pub(crate) fn is_http_port(port: u16) -> bool {
    HTTP_PORTS.contains(&port)
}

#[derive(Debug)]
struct PendingRequest {
    frame: u64,
    timestamp: Duration,
    full_uri: String,
}

#[derive(Debug, Default)]
struct StreamExchanges {
    pending: VecDeque<PendingRequest>,
    requests: u32,
    responses: u32,
}

/// Request/response pairing per TCP stream of one session.
#[derive(Debug, Default)]
pub(crate) struct HttpExchanges {
    streams: HashMap<u32, StreamExchanges>,
}

/// Header name to field key for the headers the analyzer breaks out.
fn header_key(name: &str) -> Option<&'static str> {
    Some(match name.to_ascii_lowercase().as_str() {
        "host" => "http.host",
        "user-agent" => "http.user_agent",
        "accept" => "http.accept",
        "accept-encoding" => "http.accept_encoding",
        "accept-language" => "http.accept_language",
        "connection" => "http.connection",
        "cookie" => "http.cookie",
        "referer" => "http.referer",
        "origin" => "http.origin",
        "cache-control" => "http.cache_control",
        "transfer-encoding" => "http.transfer_encoding",
        "content-type" => "http.content_type",
        "content-length" => "http.content_length_header",
        "server" => "http.server",
        "date" => "http.date",
        "last-modified" => "http.last_modified",
        _ => return None,
    })
}

fn status_text(code: u16) -> Option<&'static str> {
    Some(match code {
        100 => "Continue",
        101 => "Switching Protocols",
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        206 => "Partial Content",
        301 => "Moved Permanently",
        302 => "Found",
        304 => "Not Modified",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        _ => return None,
    })
}

fn version_text(minor: Option<u8>) -> String {
    format!("HTTP/1.{}", minor.unwrap_or(1))
}

/// Header lines, broken-out header fields and the content length, in that order.
fn header_fields(layer: &mut FieldNode, line_key: &str, headers: &[httparse::Header<'_>]) -> Option<usize> {
    let mut content_length = None;
    for header in headers {
        let value = String::from_utf8_lossy(header.value);
        layer.push(FieldNode::field(line_key, "Header", format!("{}: {}\r\n", header.name, value)));
        if let Some(key) = header_key(header.name) {
            layer.push(FieldNode::field(key, header.name, &value));
        }
        if header.name.eq_ignore_ascii_case("content-length") {
            content_length = value.trim().parse::<usize>().ok();
        }
    }
    content_length
}

fn header_value<'h>(headers: &'h [httparse::Header<'_>], name: &str) -> Option<std::borrow::Cow<'h, str>> {
    headers
        .iter()
        .find(|header| header.name.eq_ignore_ascii_case(name))
        .map(|header| String::from_utf8_lossy(header.value))
}

fn body_fields(layer: &mut FieldNode, body: &[u8], content_length: Option<usize>) {
    let body = &body[..content_length.unwrap_or(body.len()).min(body.len())];
    if let Some(length) = content_length {
        layer.push(FieldNode::field("http.content_length", "Content length", length));
    }
    if !body.is_empty() {
        layer.push(FieldNode::field("http.file_data", "File Data", String::from_utf8_lossy(body)));
    }
}

pub(crate) fn dissect(session: &mut BuiltinSession, pkt: &mut Dissection<'_>, stream: u32, payload: &[u8]) {
    if payload.starts_with(b"HTTP/") {
        response(session, pkt, stream, payload);
    } else {
        request(session, pkt, stream, payload);
    }
}

fn request(session: &mut BuiltinSession, pkt: &mut Dissection<'_>, stream: u32, payload: &[u8]) {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut headers);
    let consumed = match req.parse(payload) {
        Ok(httparse::Status::Complete(len)) => Some(len),
        Ok(httparse::Status::Partial) => None,
        Err(_) => return pkt.data_layer(payload),
    };
    let (Some(method), Some(path)) = (req.method, req.path) else {
        return pkt.data_layer(payload);
    };
    let version = version_text(req.version);
    let first_line = format!("{} {} {}", method, path, version);

    pkt.note_protocol("http");
    let mut layer = FieldNode::protocol("http", "Hypertext Transfer Protocol").with_child(
        FieldNode::subtree(format!("{}\r\n", first_line), format!("{}\\r\\n", first_line))
            .with_child(FieldNode::field("http.request.method", "Request Method", method))
            .with_child(FieldNode::field("http.request.uri", "Request URI", path))
            .with_child(FieldNode::field("http.request.version", "Request Version", &version)),
    );
    layer.push(FieldNode::field("http.request", "Request", 1));
    let content_length = header_fields(&mut layer, "http.request.line", req.headers);

    let full_uri = match header_value(req.headers, "host") {
        Some(host) if path.starts_with('/') => format!("http://{}{}", host, path),
        _ => path.to_string(),
    };
    layer.push(FieldNode::field("http.request.full_uri", "Full request URI", &full_uri));

    let exchanges = session.http.streams.entry(stream).or_default();
    exchanges.requests += 1;
    layer.push(FieldNode::field("http.request_number", "HTTP request", exchanges.requests));
    exchanges.pending.push_back(PendingRequest {
        frame: pkt.frame.number,
        timestamp: pkt.frame.timestamp,
        full_uri,
    });

    if let Some(len) = consumed {
        body_fields(&mut layer, &payload[len..], content_length);
    }
    pkt.summarize("HTTP", first_line);
    pkt.push_layer(layer);
}

fn response(session: &mut BuiltinSession, pkt: &mut Dissection<'_>, stream: u32, payload: &[u8]) {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut resp = httparse::Response::new(&mut headers);
    let consumed = match resp.parse(payload) {
        Ok(httparse::Status::Complete(len)) => Some(len),
        Ok(httparse::Status::Partial) => None,
        Err(_) => return pkt.data_layer(payload),
    };
    let Some(code) = resp.code else {
        return pkt.data_layer(payload);
    };
    let version = version_text(resp.version);
    let phrase = resp.reason.unwrap_or_default();
    let first_line = format!("{} {} {}", version, code, phrase);

    pkt.note_protocol("http");
    let mut status = FieldNode::subtree(format!("{}\r\n", first_line), format!("{}\\r\\n", first_line))
        .with_child(FieldNode::field("http.response.version", "Response Version", &version))
        .with_child(FieldNode::described(
            "http.response.code",
            "Status Code",
            code,
            format!("{} ({})", code, status_text(code).unwrap_or(phrase)),
        ));
    if let Some(desc) = status_text(code) {
        status.push(FieldNode::field("http.response.code.desc", "Status Code Description", desc));
    }
    status.push(FieldNode::field("http.response.phrase", "Response Phrase", phrase));

    let mut layer = FieldNode::protocol("http", "Hypertext Transfer Protocol").with_child(status);
    layer.push(FieldNode::field("http.response", "Response", 1));
    let content_length = header_fields(&mut layer, "http.response.line", resp.headers);

    let exchanges = session.http.streams.entry(stream).or_default();
    exchanges.responses += 1;
    layer.push(FieldNode::field("http.response_number", "HTTP response", exchanges.responses));
    if let Some(request) = exchanges.pending.pop_front() {
        let elapsed = pkt.frame.timestamp.saturating_sub(request.timestamp);
        layer.push(FieldNode::described(
            "http.time",
            "Time since request",
            format_seconds(elapsed),
            format!("{} seconds", format_seconds(elapsed)),
        ));
        layer.push(FieldNode::field("http.request_in", "Request in frame", request.frame));
        layer.push(FieldNode::field("http.response_for.uri", "Request URI", request.full_uri));
    }

    if let Some(len) = consumed {
        body_fields(&mut layer, &payload[len..], content_length);
    }
    let info = match header_value(resp.headers, "content-type") {
        Some(content_type) => format!("{}  ({})", first_line, content_type),
        None => first_line,
    };
    pkt.summarize("HTTP", info);
    pkt.push_layer(layer);
}
