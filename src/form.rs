//! Request body parsing.
//!
//! The engine parses the body once, before the chain runs, according to its
//! content type: `multipart/form-data` through [`multer`], everything else as
//! a URL-encoded form (query string first, then an
//! `application/x-www-form-urlencoded` body). A parse failure never stops
//! dispatch; it is kept on the request and only seen by a handler that asks
//! for the form.

use std::convert::Infallible;

use bytes::Bytes;
use http::HeaderMap;
use http::header::CONTENT_TYPE;
use thiserror::Error;

/// Request bodies larger than this are not read; the form records
/// [`FormError::TooLarge`] instead.
pub const MAX_BODY_BYTES: usize = 32 << 20;

const URLENCODED: &str = "application/x-www-form-urlencoded";
const MULTIPART: &str = "multipart/form-data";

/// Why the body could not be parsed as a form.
#[derive(Debug, Error)]
pub enum FormError {
    #[error("reading request body: {0}")]
    Body(String),

    #[error("request body exceeds 32 MiB")]
    TooLarge,

    #[error("multipart: {0}")]
    Multipart(#[from] multer::Error),
}

/// One uploaded file of a multipart body.
#[derive(Clone, Debug)]
pub struct FormFile {
    pub field: String,
    pub file_name: String,
    pub content_type: Option<String>,
    pub data: Bytes,
}

/// Parsed form values, in arrival order.
#[derive(Clone, Debug, Default)]
pub struct Form {
    values: Vec<(String, String)>,
    files: Vec<FormFile>,
}

impl Form {
    /// First value for `key`.
    pub fn value(&self, key: &str) -> Option<&str> {
        self.values.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    /// Every value for `key`.
    pub fn values<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> {
        self.values.iter().filter(move |(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    pub fn file(&self, field: &str) -> Option<&FormFile> {
        self.files.iter().find(|f| f.field == field)
    }

    pub fn files(&self) -> &[FormFile] {
        &self.files
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.files.is_empty()
    }

    fn extend_urlencoded(&mut self, input: &[u8]) {
        self.values.extend(
            form_urlencoded::parse(input).map(|(k, v)| (k.into_owned(), v.into_owned())),
        );
    }
}

fn content_type(headers: &HeaderMap) -> &str {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
}

/// Parses the query string and body of a request into a [`Form`].
pub(crate) async fn parse(
    headers: &HeaderMap,
    query: Option<&str>,
    body: &Bytes,
) -> Result<Form, FormError> {
    let mut form = Form::default();
    if let Some(query) = query {
        form.extend_urlencoded(query.as_bytes());
    }

    let content_type = content_type(headers);
    if content_type.contains(MULTIPART) {
        parse_multipart(&mut form, content_type, body.clone()).await?;
    } else if content_type.starts_with(URLENCODED) {
        form.extend_urlencoded(body);
    }
    Ok(form)
}

async fn parse_multipart(form: &mut Form, content_type: &str, body: Bytes) -> Result<(), FormError> {
    let boundary = multer::parse_boundary(content_type)?;
    let stream = futures_util::stream::once(async move { Ok::<Bytes, Infallible>(body) });
    let constraints = multer::Constraints::new()
        .size_limit(multer::SizeLimit::new().whole_stream(MAX_BODY_BYTES as u64));
    let mut multipart = multer::Multipart::with_constraints(stream, boundary, constraints);

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_owned();
        let file_name = field.file_name().map(str::to_owned);
        let content_type = field.content_type().map(ToString::to_string);
        let data = field.bytes().await?;

        match file_name {
            Some(file_name) => form.files.push(FormFile { field: name, file_name, content_type, data }),
            None => form.values.push((name, String::from_utf8_lossy(&data).into_owned())),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(content_type: &'static str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(CONTENT_TYPE, content_type.parse().unwrap());
        h
    }

    #[tokio::test]
    async fn query_and_urlencoded_body_are_merged() {
        let body = Bytes::from_static(b"name=alice+smith&tag=a%26b");
        let form = parse(&headers(URLENCODED), Some("page=2&tag=x"), &body).await.unwrap();

        assert_eq!(form.value("page"), Some("2"));
        assert_eq!(form.value("name"), Some("alice smith"));
        assert_eq!(form.values("tag").collect::<Vec<_>>(), ["x", "a&b"]);
    }

    #[tokio::test]
    async fn other_content_types_leave_body_alone() {
        let body = Bytes::from_static(br#"{"name":"alice"}"#);
        let form = parse(&headers("application/json"), None, &body).await.unwrap();

        assert!(form.is_empty());
    }

    #[tokio::test]
    async fn multipart_fields_and_files() {
        let body = Bytes::from_static(
            b"--XYZ\r\n\
              Content-Disposition: form-data; name=\"title\"\r\n\r\n\
              hello\r\n\
              --XYZ\r\n\
              Content-Disposition: form-data; name=\"upload\"; filename=\"a.txt\"\r\n\
              Content-Type: text/plain\r\n\r\n\
              file body\r\n\
              --XYZ--\r\n",
        );
        let form = parse(&headers("multipart/form-data; boundary=XYZ"), None, &body)
            .await
            .unwrap();

        assert_eq!(form.value("title"), Some("hello"));
        let file = form.file("upload").unwrap();
        assert_eq!(file.file_name, "a.txt");
        assert_eq!(file.content_type.as_deref(), Some("text/plain"));
        assert_eq!(&file.data[..], b"file body");
    }

    #[tokio::test]
    async fn malformed_multipart_is_an_error() {
        let body = Bytes::from_static(b"not multipart at all");
        let res = parse(&headers("multipart/form-data"), None, &body).await;

        assert!(matches!(res, Err(FormError::Multipart(_))));
    }
}
