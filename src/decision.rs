use crate::config::{CompressionConfig, ENCODING};
use http::{HeaderMap, Method, Request, header};

/// Shortest extension (dot included) that can name a skipped media type.
///
/// Anything shorter is compressed without consulting the skip set.
pub const MIN_EXTENSION_LEN: usize = 4;

/// The parts of an inbound request that the compression decision reads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestSignal<'a> {
    /// `Accept-Encoding` request header.
    pub accept_encoding: Option<&'a str>,
    /// `Connection` request header, as raw bytes.
    pub connection: Option<&'a [u8]>,
    /// `Content-Type` request header, as raw bytes.
    pub content_type: Option<&'a [u8]>,
    /// URL path, without query.
    pub path: &'a str,
    /// Request method, when known.
    pub method: Option<&'a Method>,
}

impl<'a> RequestSignal<'a> {
    /// Reads the signal from request headers and a URL path.
    pub fn new(headers: &'a HeaderMap, path: &'a str) -> Self {
        Self {
            accept_encoding: headers
                .get(header::ACCEPT_ENCODING)
                .and_then(|v| v.to_str().ok()),
            connection: header_bytes(headers, header::CONNECTION),
            content_type: header_bytes(headers, header::CONTENT_TYPE),
            path,
            method: None,
        }
    }

    /// Reads the signal from an `http::Request`.
    pub fn from_request<B>(req: &'a Request<B>) -> Self {
        Self {
            method: Some(req.method()),
            ..Self::new(req.headers(), req.uri().path())
        }
    }

    /// Returns true for a HEAD request, whose response never has a body.
    pub fn is_head(&self) -> bool {
        self.method == Some(&Method::HEAD)
    }
}

/// Decides whether the response to this request should be Brotli-compressed.
///
/// Rules, first match wins:
/// 1. `Accept-Encoding` without `br` never compresses.
/// 2. Protocol upgrades (`Connection: Upgrade`) pass through untouched.
/// 3. `text/event-stream` is unbounded and must not be buffered by an encoder.
/// 4. Paths without a plausible media extension compress.
/// 5. Paths whose extension is in the skip set do not.
pub fn should_compress(signal: &RequestSignal<'_>, config: &CompressionConfig) -> bool {
    if !signal.accept_encoding.is_some_and(accepts_brotli)
        || signal
            .connection
            .is_some_and(|v| contains_ignore_ascii_case(v, b"upgrade"))
        || signal.content_type.is_some_and(is_event_stream)
    {
        return false;
    }

    let extension = path_extension(signal.path);
    if extension.len() < MIN_EXTENSION_LEN {
        // fast path
        return true;
    }

    !config.skips_extension(extension)
}

/// Returns true if the Accept-Encoding value lists Brotli with a non-zero quality.
fn accepts_brotli(header: &str) -> bool {
    header.split(',').any(|part| {
        let (encoding, quality) = parse_encoding_with_quality(part.trim());
        quality > 0.0
            && (encoding.eq_ignore_ascii_case(ENCODING) || encoding.eq_ignore_ascii_case("brotli"))
    })
}

/// Parses an encoding entry like "gzip" or "br;q=0.8" into (encoding, quality).
fn parse_encoding_with_quality(s: &str) -> (&str, f32) {
    let mut parts = s.splitn(2, ';');
    let encoding = parts.next().unwrap_or("").trim();

    let quality = parts
        .next()
        .and_then(|q| {
            let q = q.trim();
            if q.starts_with("q=") || q.starts_with("Q=") {
                q[2..].parse::<f32>().ok()
            } else {
                None
            }
        })
        .unwrap_or(1.0);

    (encoding, quality)
}

fn header_bytes(headers: &HeaderMap, name: header::HeaderName) -> Option<&[u8]> {
    headers.get(name).map(|v| v.as_bytes())
}

/// Returns true if a `Content-Type` value names `text/event-stream`.
pub(crate) fn is_event_stream(content_type: &[u8]) -> bool {
    contains_ignore_ascii_case(content_type, b"text/event-stream")
}

/// Returns the suffix of the last path segment starting at its last dot.
fn path_extension(path: &str) -> &str {
    let name = path.rsplit('/').next().unwrap_or(path);
    name.rfind('.').map_or("", |dot| &name[dot..])
}

fn contains_ignore_ascii_case(haystack: &[u8], needle: &[u8]) -> bool {
    haystack
        .windows(needle.len())
        .any(|window| window.eq_ignore_ascii_case(needle))
}
