//! Response renderers.
//!
//! A [`Render`] knows its content type and how to write its body into a
//! [`ResponseWriter`]. [`Context::render`](crate::Context::render) drives
//! them: content type first (only if none is set yet), then the status,
//! then the body unless the status forbids one.

use bytes::Bytes;
use http::StatusCode;
use http::header::{HeaderValue, LOCATION};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::response::{ContentType, ResponseWriter};

pub trait Render {
    fn write_content_type(&self, w: &mut ResponseWriter);
    fn render(&self, w: &mut ResponseWriter) -> Result<()>;
}

/// `text/plain` body.
#[derive(Debug)]
pub struct Text(pub String);

impl Render for Text {
    fn write_content_type(&self, w: &mut ResponseWriter) {
        w.set_content_type(ContentType::Text.as_str());
    }

    fn render(&self, w: &mut ResponseWriter) -> Result<()> {
        self.write_content_type(w);
        w.write(self.0.as_bytes());
        Ok(())
    }
}

/// The standard JSON envelope: `{"code": .., "message": .., "ttl": .., "data": ..}`.
#[derive(Debug)]
pub struct Json<T> {
    pub code: i32,
    pub message: String,
    /// Values below 1 are sent as 1.
    pub ttl: i32,
    pub data: T,
}

#[derive(Serialize)]
struct Envelope<'a, T> {
    code: i32,
    message: &'a str,
    ttl: i32,
    data: &'a T,
}

impl<T: Serialize> Render for Json<T> {
    fn write_content_type(&self, w: &mut ResponseWriter) {
        w.set_content_type(ContentType::Json.as_str());
    }

    fn render(&self, w: &mut ResponseWriter) -> Result<()> {
        let envelope = Envelope {
            code: self.code,
            message: &self.message,
            ttl: self.ttl.max(1),
            data: &self.data,
        };
        write_json(w, &envelope)
    }
}

/// A free-form JSON object.
#[derive(Debug, Default)]
pub struct MapJson(pub serde_json::Map<String, serde_json::Value>);

impl Render for MapJson {
    fn write_content_type(&self, w: &mut ResponseWriter) {
        w.set_content_type(ContentType::Json.as_str());
    }

    fn render(&self, w: &mut ResponseWriter) -> Result<()> {
        write_json(w, &self.0)
    }
}

fn write_json<T: Serialize + ?Sized>(w: &mut ResponseWriter, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec(value)?;
    w.set_content_type(ContentType::Json.as_str());
    w.write(&bytes);
    Ok(())
}

/// Raw chunks under a caller-chosen content type.
#[derive(Debug)]
pub struct Data {
    pub content_type: String,
    pub chunks: Vec<Bytes>,
}

impl Render for Data {
    fn write_content_type(&self, w: &mut ResponseWriter) {
        w.set_content_type(&self.content_type);
    }

    fn render(&self, w: &mut ResponseWriter) -> Result<()> {
        self.write_content_type(w);
        for chunk in &self.chunks {
            w.write(chunk);
        }
        Ok(())
    }
}

/// A `Location` redirect. Only `201 Created` and `300`–`308` are accepted.
#[derive(Debug)]
pub struct Redirect {
    pub code: StatusCode,
    pub location: String,
}

impl Render for Redirect {
    fn write_content_type(&self, _: &mut ResponseWriter) {}

    fn render(&self, w: &mut ResponseWriter) -> Result<()> {
        let code = self.code.as_u16();
        if !(300..=308).contains(&code) && code != 201 {
            return Err(Error::Redirect(code));
        }
        let location = HeaderValue::from_str(&self.location)
            .map_err(|_| Error::Redirect(code))?;
        w.headers_mut().insert(LOCATION, location);
        w.write_header(self.code);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::CONTENT_TYPE;

    #[test]
    fn json_envelope_defaults_ttl_to_one() {
        let mut w = ResponseWriter::new();
        Json { code: 0, message: "ok".into(), ttl: 0, data: [1, 2] }.render(&mut w).unwrap();

        let body: serde_json::Value = serde_json::from_slice(w.body()).unwrap();
        assert_eq!(body, serde_json::json!({"code": 0, "message": "ok", "ttl": 1, "data": [1, 2]}));
        assert_eq!(w.headers()[CONTENT_TYPE], ContentType::Json.as_str());
    }

    #[test]
    fn data_keeps_existing_content_type() {
        let mut w = ResponseWriter::new();
        w.set_content_type("image/png");
        Data { content_type: "text/csv".into(), chunks: vec![Bytes::from_static(b"a,"), Bytes::from_static(b"b")] }
            .render(&mut w)
            .unwrap();

        assert_eq!(w.headers()[CONTENT_TYPE], "image/png");
        assert_eq!(w.body(), b"a,b");
    }

    #[test]
    fn redirect_sets_location_and_status() {
        let mut w = ResponseWriter::new();
        Redirect { code: StatusCode::FOUND, location: "/login".into() }.render(&mut w).unwrap();

        assert_eq!(w.status(), StatusCode::FOUND);
        assert_eq!(w.headers()[LOCATION], "/login");
    }

    #[test]
    fn redirect_rejects_non_redirect_status() {
        let mut w = ResponseWriter::new();
        let err = Redirect { code: StatusCode::OK, location: "/".into() }.render(&mut w);

        assert!(matches!(err, Err(Error::Redirect(200))));
        assert!(!w.written());
    }
}
