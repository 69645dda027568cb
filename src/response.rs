//! Buffered response writer.
//!
//! Handlers never build a response value. They write into the
//! [`ResponseWriter`] owned by their [`Context`](crate::Context): a status
//! line, headers, and body bytes. When the chain finishes the engine turns
//! whatever was written into one hyper response.
//!
//! The status is written at most once. The first `write_header` wins; later
//! calls are logged and ignored, the same way a header already on the wire
//! cannot be taken back. Writing body bytes without a status implies `200 OK`.

use bytes::{Bytes, BytesMut};
use http::header::{CONTENT_TYPE, HeaderValue, X_CONTENT_TYPE_OPTIONS};
use http::{HeaderMap, StatusCode};
use http_body_util::Full;
use tracing::warn;

// ── ContentType ───────────────────────────────────────────────────────────────

/// Common content-type values, usable anywhere a content type string is accepted.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ContentType {
    Csv,          // text/csv
    EventStream,  // text/event-stream  (SSE)
    FormData,     // application/x-www-form-urlencoded
    Html,         // text/html; charset=utf-8
    Json,         // application/json; charset=utf-8
    MsgPack,      // application/msgpack
    OctetStream,  // application/octet-stream  (binary / file download)
    Pdf,          // application/pdf
    Text,         // text/plain; charset=utf-8
    Xml,          // application/xml
}

impl ContentType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Csv         => "text/csv",
            Self::EventStream => "text/event-stream",
            Self::FormData    => "application/x-www-form-urlencoded",
            Self::Html        => "text/html; charset=utf-8",
            Self::Json        => "application/json; charset=utf-8",
            Self::MsgPack     => "application/msgpack",
            Self::OctetStream => "application/octet-stream",
            Self::Pdf         => "application/pdf",
            Self::Text        => "text/plain; charset=utf-8",
            Self::Xml         => "application/xml",
        }
    }
}

impl AsRef<str> for ContentType {
    fn as_ref(&self) -> &str { self.as_str() }
}

// ── ResponseWriter ────────────────────────────────────────────────────────────

/// Whether a body may follow `status`. Only `304 Not Modified` forbids it here;
/// hyper itself drops bodies of informational and `204` responses on the wire.
pub(crate) fn body_allowed(status: StatusCode) -> bool {
    status != StatusCode::NOT_MODIFIED
}

/// The response being assembled for one request.
#[derive(Debug, Default)]
pub struct ResponseWriter {
    status: Option<StatusCode>,
    headers: HeaderMap,
    body: BytesMut,
}

impl ResponseWriter {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub fn headers(&self) -> &HeaderMap { &self.headers }
    pub fn headers_mut(&mut self) -> &mut HeaderMap { &mut self.headers }

    /// The status written so far, or `200 OK` if none was.
    pub fn status(&self) -> StatusCode {
        self.status.unwrap_or(StatusCode::OK)
    }

    /// Whether a status has been written, explicitly or by a body write.
    pub fn written(&self) -> bool {
        self.status.is_some()
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn write_header(&mut self, code: StatusCode) {
        if let Some(current) = self.status {
            warn!(current = current.as_u16(), ignored = code.as_u16(), "superfluous write_header call");
            return;
        }
        self.status = Some(code);
    }

    pub fn write(&mut self, data: &[u8]) {
        if self.status.is_none() {
            self.status = Some(StatusCode::OK);
        }
        self.body.extend_from_slice(data);
    }

    /// Sets `content-type` unless a value is already present.
    pub fn set_content_type(&mut self, value: &str) {
        if self.headers.contains_key(CONTENT_TYPE) {
            return;
        }
        match HeaderValue::from_str(value) {
            Ok(v) => {
                self.headers.insert(CONTENT_TYPE, v);
            }
            Err(_) => warn!(value, "invalid content-type value ignored"),
        }
    }

    /// Plain-text error reply: the status, its reason phrase, and a newline.
    pub(crate) fn error(&mut self, code: StatusCode) {
        self.headers.insert(CONTENT_TYPE, HeaderValue::from_static(ContentType::Text.as_str()));
        self.headers.insert(X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
        self.write_header(code);
        self.write(code.canonical_reason().unwrap_or_default().as_bytes());
        self.write(b"\n");
    }

    pub(crate) fn into_response(self) -> http::Response<Full<Bytes>> {
        let status = self.status();
        let body = if body_allowed(status) { self.body.freeze() } else { Bytes::new() };

        let mut res = http::Response::new(Full::new(body));
        *res.status_mut() = status;
        *res.headers_mut() = self.headers;
        res
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_status_wins() {
        let mut w = ResponseWriter::new();
        w.write_header(StatusCode::CREATED);
        w.write_header(StatusCode::BAD_REQUEST);

        assert_eq!(w.status(), StatusCode::CREATED);
    }

    #[test]
    fn body_write_implies_ok() {
        let mut w = ResponseWriter::new();
        assert!(!w.written());

        w.write(b"hi");
        w.write_header(StatusCode::ACCEPTED);

        assert!(w.written());
        assert_eq!(w.status(), StatusCode::OK);
        assert_eq!(w.body(), b"hi");
    }

    #[test]
    fn content_type_first_writer_wins() {
        let mut w = ResponseWriter::new();
        w.set_content_type(ContentType::Json.as_str());
        w.set_content_type(ContentType::Text.as_str());

        assert_eq!(w.headers()[CONTENT_TYPE], ContentType::Json.as_str());
    }

    #[test]
    fn not_modified_never_carries_a_body() {
        let mut w = ResponseWriter::new();
        w.write_header(StatusCode::NOT_MODIFIED);
        w.write(b"stale");

        let res = w.into_response();
        assert_eq!(res.status(), StatusCode::NOT_MODIFIED);
        assert_eq!(hyper::body::Body::size_hint(res.body()).exact(), Some(0));
    }

    #[test]
    fn error_reply_is_plain_text() {
        let mut w = ResponseWriter::new();
        w.error(StatusCode::METHOD_NOT_ALLOWED);

        assert_eq!(w.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(w.body(), b"Method Not Allowed\n");
        assert_eq!(w.headers()[X_CONTENT_TYPE_OPTIONS], "nosniff");
    }
}
