//! Conditional GET.
//!
//! Works on plain strings so the quiet-mode path and the HTTP transport share one
//! implementation.

use std::time::SystemTime;

use time::{Duration, OffsetDateTime};

use crate::domain::encoding::ContentEncoding;

use super::context::RequestContext;

const ETAG_PREFIX_LEN: usize = 16;

/// Request headers the pipeline looks at.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientHeaders {
    pub if_none_match: Option<String>,
    pub if_modified_since: Option<String>,
    pub accept_encoding: Option<String>,
    pub user_agent: Option<String>,
}

/// What a client cache may rely on for one response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheMetadata {
    pub last_modified: OffsetDateTime,
    pub etag: String,
    pub max_age: u64,
    pub public: bool,
    /// Never answer 304 (debug mode).
    pub invalidate: bool,
}

impl CacheMetadata {
    pub fn new(
        ctx: &RequestContext,
        fingerprint: &str,
        last_modified: OffsetDateTime,
        encoding: ContentEncoding,
    ) -> Self {
        Self {
            last_modified,
            etag: etag(fingerprint, ctx.public, encoding),
            max_age: ctx.effective_max_age(),
            public: ctx.public,
            invalidate: ctx.debug,
        }
    }

    fn scope(&self) -> &'static str {
        if self.public { "public" } else { "private" }
    }

    /// `Cache-Control`, `Expires`, `ETag` and `Last-Modified`, in that order.
    pub fn headers(&self, now: OffsetDateTime) -> Vec<(String, String)> {
        let mut headers = Vec::with_capacity(4);
        if self.max_age > 0 {
            headers.push((
                "Cache-Control".to_string(),
                format!("max-age={}, {}", self.max_age, self.scope()),
            ));
            let max_age = i64::try_from(self.max_age).unwrap_or(i64::MAX);
            let expires = now.saturating_add(Duration::seconds(max_age));
            headers.push(("Expires".to_string(), http_date(expires)));
        } else {
            headers.push((
                "Cache-Control".to_string(),
                format!("max-age=0, must-revalidate, {}", self.scope()),
            ));
        }
        headers.push(("ETag".to_string(), self.etag.clone()));
        headers.push(("Last-Modified".to_string(), http_date(self.last_modified)));
        headers
    }

    /// Whether the client's cached copy is still current.
    ///
    /// `If-None-Match` decides alone when present; `If-Modified-Since` is compared
    /// at one-second precision.
    pub fn client_cache_is_valid(&self, client: &ClientHeaders) -> bool {
        if self.invalidate {
            return false;
        }
        if let Some(if_none_match) = client.if_none_match.as_deref() {
            return etag_matches(&self.etag, if_none_match);
        }
        client
            .if_modified_since
            .as_deref()
            .and_then(|value| httpdate::parse_http_date(value.trim()).ok())
            .map(OffsetDateTime::from)
            .is_some_and(|since| since.unix_timestamp() >= self.last_modified.unix_timestamp())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Negotiation {
    pub status: u16,
    pub headers: Vec<(String, String)>,
}

impl Negotiation {
    pub fn is_not_modified(&self) -> bool {
        self.status == 304
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn push_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.push((name.into(), value.into()));
    }
}

/// Decide between `304 Not Modified` and a full response.
///
/// The 304 carries only cache headers (plus `Vary` when sent). The full path also
/// gets `Content-Type` and `Content-Encoding`; the caller adds `Content-Length` once
/// the body size is known.
pub fn negotiate(
    ctx: &RequestContext,
    metadata: &CacheMetadata,
    client: &ClientHeaders,
    encoding: ContentEncoding,
    send_vary: bool,
    now: OffsetDateTime,
) -> Negotiation {
    let mut headers = metadata.headers(now);
    if send_vary {
        headers.push(("Vary".to_string(), "Accept-Encoding".to_string()));
    }

    if !ctx.disable_304 && metadata.client_cache_is_valid(client) {
        return Negotiation {
            status: 304,
            headers,
        };
    }

    headers.push(("Content-Type".to_string(), ctx.content_type_header()));
    if !encoding.is_identity() {
        headers.push(("Content-Encoding".to_string(), encoding.as_str().to_string()));
    }
    Negotiation {
        status: 200,
        headers,
    }
}

/// `"{16 hex chars}{pub|pri}{;gz|;de|;br}"`.
pub fn etag(fingerprint: &str, public: bool, encoding: ContentEncoding) -> String {
    let prefix = fingerprint
        .get(..ETAG_PREFIX_LEN)
        .unwrap_or(fingerprint);
    let scope = if public { "pub" } else { "pri" };
    format!("\"{prefix}{scope}{}\"", encoding.etag_suffix())
}

fn etag_matches(etag: &str, if_none_match: &str) -> bool {
    if_none_match.split(',').map(str::trim).any(|candidate| {
        candidate == "*" || candidate.strip_prefix("W/").unwrap_or(candidate) == etag
    })
}

pub fn http_date(at: OffsetDateTime) -> String {
    httpdate::fmt_http_date(SystemTime::from(at))
}

/// Old Internet Explorer builds mangle compressed responses and `Vary`.
pub fn is_buggy_ie(user_agent: Option<&str>) -> bool {
    let Some(ua) = user_agent else {
        return false;
    };
    if ua.contains("Opera") {
        return false;
    }
    let version = ua
        .split("MSIE ")
        .nth(1)
        .and_then(|rest| rest.chars().next());
    match version {
        Some('5') => true,
        Some('6') => !ua.contains("SV1"),
        _ => false,
    }
}
