//! Application layers: HTTP and DNS.

use serde::{Deserialize, Serialize};

use super::{Layer, one_or_many, parse, subtree_entries};

/// One HTTP/1.x request or response.
///
/// The request or status line is a subtree keyed by the line itself, so only
/// the header-derived fields and pairing information are picked out here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpLayer {
    #[serde(rename = "http.request")]
    pub request: Option<String>,
    #[serde(rename = "http.response")]
    pub response: Option<String>,
    #[serde(rename = "http.request.line", deserialize_with = "one_or_many")]
    pub request_lines: Vec<String>,
    #[serde(rename = "http.response.line", deserialize_with = "one_or_many")]
    pub response_lines: Vec<String>,
    #[serde(rename = "http.request.full_uri")]
    pub full_uri: Option<String>,
    #[serde(rename = "http.host")]
    pub host: Option<String>,
    #[serde(rename = "http.user_agent")]
    pub user_agent: Option<String>,
    #[serde(rename = "http.accept")]
    pub accept: Option<String>,
    #[serde(rename = "http.connection")]
    pub connection: Option<String>,
    #[serde(rename = "http.cookie")]
    pub cookie: Option<String>,
    #[serde(rename = "http.referer")]
    pub referer: Option<String>,
    #[serde(rename = "http.server")]
    pub server: Option<String>,
    #[serde(rename = "http.date")]
    pub date: Option<String>,
    #[serde(rename = "http.last_modified")]
    pub last_modified: Option<String>,
    #[serde(rename = "http.content_type")]
    pub content_type: Option<String>,
    #[serde(rename = "http.content_length_header")]
    pub content_length_header: Option<String>,
    #[serde(rename = "http.content_length")]
    pub content_length: Option<String>,
    #[serde(rename = "http.file_data")]
    pub file_data: Option<String>,
    #[serde(rename = "http.request_number")]
    pub request_number: Option<String>,
    #[serde(rename = "http.response_number")]
    pub response_number: Option<String>,
    #[serde(rename = "http.request_in")]
    pub request_in: Option<String>,
    #[serde(rename = "http.response_for.uri")]
    pub response_for_uri: Option<String>,
    #[serde(rename = "http.time")]
    pub time: Option<String>,
}

impl Layer for HttpLayer {
    const NAME: &'static str = "http";
}

impl HttpLayer {
    pub fn is_request(&self) -> bool {
        self.request.is_some()
    }

    pub fn is_response(&self) -> bool {
        self.response.is_some()
    }

    /// Frame number of the request this response answers.
    pub fn request_in(&self) -> Option<u64> {
        parse(&self.request_in)
    }

    pub fn content_length(&self) -> Option<u64> {
        parse(&self.content_length)
    }
}

/// One question of a DNS message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DnsQuery {
    #[serde(rename = "dns.qry.name")]
    pub name: Option<String>,
    #[serde(rename = "dns.qry.name.len")]
    pub name_len: Option<String>,
    #[serde(rename = "dns.count.labels")]
    pub labels: Option<String>,
    #[serde(rename = "dns.qry.type")]
    pub qtype: Option<String>,
    #[serde(rename = "dns.qry.class")]
    pub class: Option<String>,
}

/// One answer record of a DNS message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DnsAnswer {
    #[serde(rename = "dns.resp.name")]
    pub name: Option<String>,
    #[serde(rename = "dns.resp.type")]
    pub rtype: Option<String>,
    #[serde(rename = "dns.resp.class")]
    pub class: Option<String>,
    #[serde(rename = "dns.resp.ttl")]
    pub ttl: Option<String>,
    #[serde(rename = "dns.resp.len")]
    pub len: Option<String>,
    #[serde(rename = "dns.a")]
    pub a: Option<String>,
    #[serde(rename = "dns.aaaa")]
    pub aaaa: Option<String>,
    #[serde(rename = "dns.cname")]
    pub cname: Option<String>,
}

impl DnsAnswer {
    pub fn ttl(&self) -> Option<u32> {
        parse(&self.ttl)
    }
}

/// A DNS message with its questions and answers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DnsLayer {
    #[serde(rename = "dns.id")]
    pub id: Option<String>,
    #[serde(rename = "dns.flags")]
    pub flags: Option<String>,
    #[serde(rename = "dns.count.queries")]
    pub queries_count: Option<String>,
    #[serde(rename = "dns.count.answers")]
    pub answers_count: Option<String>,
    #[serde(rename = "Queries", deserialize_with = "subtree_entries")]
    pub queries: Vec<DnsQuery>,
    #[serde(rename = "Answers", deserialize_with = "subtree_entries")]
    pub answers: Vec<DnsAnswer>,
}

impl Layer for DnsLayer {
    const NAME: &'static str = "dns";
}

impl DnsLayer {
    /// Transaction id, parsed from its `0x`-prefixed hex rendering.
    pub fn id(&self) -> Option<u16> {
        hex_word(&self.id)
    }

    pub fn is_response(&self) -> bool {
        hex_word(&self.flags).is_some_and(|flags| flags & 0x8000 != 0)
    }

    pub fn queries_count(&self) -> Option<u16> {
        parse(&self.queries_count)
    }

    pub fn answers_count(&self) -> Option<u16> {
        parse(&self.answers_count)
    }
}

/// Leading `0x1234` word of a raw or descriptive value.
fn hex_word(value: &Option<String>) -> Option<u16> {
    let word = value.as_deref()?.split_whitespace().next()?;
    u16::from_str_radix(word.strip_prefix("0x")?, 16).ok()
}
