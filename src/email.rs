//! Parsed email representation handed to the analyzer.
//!
//! Parsing raw EML/MSG files happens elsewhere; these types only mirror the
//! structure the parser produces so it can be deserialized, analysed and
//! cached again.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A raw header value. Some parsers emit numeric values for headers such as
/// `X-Priority`, so both shapes are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HeaderValue {
    Text(String),
    Number(i64),
}

impl HeaderValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            HeaderValue::Text(text) => Some(text),
            HeaderValue::Number(_) => None,
        }
    }
}

impl From<&str> for HeaderValue {
    fn from(value: &str) -> Self {
        HeaderValue::Text(value.to_string())
    }
}

/// Header name to every value seen for it, in message order.
pub type HeaderMap = BTreeMap<String, Vec<HeaderValue>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hash {
    pub md5: String,
    pub sha1: String,
    pub sha256: String,
    pub sha512: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub raw: String,
    pub filename: String,
    pub size: u64,
    #[serde(default)]
    pub extension: Option<String>,
    pub hash: Hash,
    pub mime_type: String,
    pub mime_type_short: String,
    #[serde(default)]
    pub content_id: Option<String>,
    #[serde(default)]
    pub content_header: HeaderMap,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Body {
    #[serde(default)]
    pub content_type: Option<String>,
    pub hash: String,
    #[serde(default)]
    pub content_header: HeaderMap,
    pub content: String,
    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(default)]
    pub emails: Vec<String>,
    #[serde(default)]
    pub domains: Vec<String>,
    #[serde(default)]
    pub ip_addresses: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Received {
    #[serde(default)]
    pub by: Option<Vec<String>>,
    pub date: String,
    #[serde(rename = "for", default)]
    pub for_: Option<Vec<String>>,
    #[serde(rename = "from", default)]
    pub from_: Option<Vec<String>>,
    pub src: String,
    #[serde(rename = "with", default)]
    pub with_: Option<String>,
    #[serde(default)]
    pub delay: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Header {
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub defect: Option<Vec<String>>,
    #[serde(rename = "from", default)]
    pub from_: Option<String>,
    #[serde(default)]
    pub to: Vec<String>,
    #[serde(default)]
    pub cc: Option<Vec<String>>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub received_email: Option<Vec<String>>,
    #[serde(default)]
    pub received_foremail: Option<Vec<String>>,
    #[serde(default)]
    pub received_domain: Option<Vec<String>>,
    #[serde(default)]
    pub received_ip: Option<Vec<String>>,
    #[serde(default)]
    pub received_src: Option<String>,
    #[serde(default)]
    pub received: Vec<Received>,
    #[serde(default)]
    pub header: HeaderMap,
}

impl Header {
    /// Case-insensitive lookup of every value recorded for `name`.
    pub fn values(&self, name: &str) -> Vec<&HeaderValue> {
        self.header
            .iter()
            .filter(|(key, _)| key.eq_ignore_ascii_case(name))
            .flat_map(|(_, values)| values.iter())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Eml {
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub bodies: Vec<Body>,
    pub header: Header,
}

impl Eml {
    pub fn from_json(content: &str) -> serde_json::Result<Self> {
        serde_json::from_str(content)
    }

    pub fn sender(&self) -> Option<&str> {
        self.header.from_.as_deref()
    }
}
