//! Incoming HTTP request type.

use std::net::SocketAddr;

use bytes::Bytes;
use http::request::Parts;
use http::{HeaderMap, Method, Uri};

use crate::form::{Form, FormError, FormFile};

/// An incoming HTTP request with its body already buffered and parsed.
pub struct Request {
    parts: Parts,
    body: Bytes,
    remote_addr: SocketAddr,
    form: Result<Form, FormError>,
}

impl Request {
    pub(crate) fn new(
        parts: Parts,
        body: Bytes,
        remote_addr: SocketAddr,
        form: Result<Form, FormError>,
    ) -> Self {
        Self { parts, body, remote_addr, form }
    }

    pub fn method(&self) -> &Method { &self.parts.method }
    pub fn uri(&self) -> &Uri { &self.parts.uri }
    pub fn path(&self) -> &str { self.parts.uri.path() }
    pub fn query(&self) -> Option<&str> { self.parts.uri.query() }
    pub fn headers(&self) -> &HeaderMap { &self.parts.headers }
    pub fn body(&self) -> &Bytes { &self.body }
    pub fn remote_addr(&self) -> SocketAddr { self.remote_addr }

    /// Typed request extensions, as set by a hyper layer in front of the engine.
    pub fn extensions(&self) -> &http::Extensions { &self.parts.extensions }

    /// Case-insensitive header lookup. Non-UTF-8 values read as absent.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.parts.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// The parsed form, or why the body could not be parsed.
    pub fn form(&self) -> Result<&Form, &FormError> {
        self.form.as_ref()
    }

    /// First form value for `key`. A body that failed to parse has no values.
    pub fn form_value(&self, key: &str) -> Option<&str> {
        self.form.as_ref().ok()?.value(key)
    }

    /// Uploaded file for a multipart `field`.
    pub fn form_file(&self, field: &str) -> Option<&FormFile> {
        self.form.as_ref().ok()?.file(field)
    }
}
