//! Route method validation.
//!
//! A route declares its method as a plain uppercase token. Anything made of
//! `A`–`Z` is accepted: the RFC 9110 set, WebDAV verbs, `PURGE`, or a private
//! verb your proxies understand. Everything else is
//! a programmer error and panics at registration time, long before a request
//! arrives.

use std::sync::LazyLock;

use http::Method;
use regex::Regex;

static METHOD_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("^[A-Z]+$").expect("method pattern is a valid regex"));

/// Parses the declared method of a route.
///
/// # Panics
///
/// Panics if `method` is empty or contains anything but uppercase ASCII letters.
pub(crate) fn parse(method: &str) -> Method {
    if !METHOD_TOKEN.is_match(method) {
        panic!("mochi: http method `{method}` is not valid");
    }
    Method::from_bytes(method.as_bytes())
        .unwrap_or_else(|e| panic!("mochi: http method `{method}` is not valid: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_methods_map_to_http_constants() {
        assert_eq!(parse("GET"), Method::GET);
        assert_eq!(parse("DELETE"), Method::DELETE);
        assert_eq!(parse("HEAD"), Method::HEAD);
    }

    #[test]
    fn extension_methods_are_accepted() {
        assert_eq!(parse("PURGE").as_str(), "PURGE");
        assert_eq!(parse("PROPFIND").as_str(), "PROPFIND");
    }

    #[test]
    #[should_panic(expected = "is not valid")]
    fn lowercase_method_panics() {
        parse("get");
    }

    #[test]
    #[should_panic(expected = "is not valid")]
    fn empty_method_panics() {
        parse("");
    }

    #[test]
    #[should_panic(expected = "is not valid")]
    fn method_with_separator_panics() {
        parse("GE-T");
    }
}
