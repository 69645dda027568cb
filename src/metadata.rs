//! Request metadata carried on a [`Scope`].
//!
//! Every request gets a [`Metadata`] map built from its headers (caller,
//! remote address, mirror flag, effective timeout) and attached to the scope
//! the handler chain runs under. Handlers and any work they spawn read it
//! back with the typed accessors in this module.
//!
//! # Read-only once attached
//!
//! [`attach`] takes the map by value and [`from_scope`] only ever hands out
//! `&Metadata`, so an attached map cannot be changed in place by anyone.
//! To extend it, clone it (shallow, copy-on-write), insert into the clone,
//! and attach the clone to a *new* scope:
//!
//! ```rust
//! use mochi::metadata::{self, Metadata};
//! use mochi::Scope;
//!
//! let parent = metadata::attach(&Scope::background(), Metadata::pairs([("caller", "svc-a")]));
//!
//! let mut extended = metadata::from_scope(&parent).cloned().unwrap_or_default();
//! extended.insert("color", "blue");
//! let child = metadata::attach(&parent, extended);
//!
//! assert_eq!(metadata::string(&child, "color"), "blue");
//! assert_eq!(metadata::string(&parent, "color"), "");
//! ```
//!
//! # Outliving the request
//!
//! The request scope is cancelled as soon as the handler chain returns.
//! Background work started from a handler must run under [`detach`], which
//! keeps the metadata and drops the deadline and cancellation.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::scope::Scope;

/// Well-known metadata keys set on every request scope.
pub mod keys {
    /// Client IP, from forwarding headers or the peer address.
    pub const REMOTE_IP: &str = "remote_ip";
    /// Client port, from the remote-port header; empty when absent.
    pub const REMOTE_PORT: &str = "remote_port";
    /// Upstream caller identity.
    pub const CALLER: &str = "caller";
    /// Effective request timeout in milliseconds (`0` = unbounded).
    pub const TIMEOUT: &str = "timeout";
    /// Whether the request is shadow traffic.
    pub const MIRROR: &str = "mirror";
}

/// A metadata value. The set of kinds is closed.
#[derive(Clone)]
pub enum Value {
    String(String),
    Int64(i64),
    Bool(bool),
    /// Anything else. Shared, never copied.
    Opaque(Arc<dyn Any + Send + Sync>),
}

impl Value {
    pub fn opaque<T: Any + Send + Sync>(value: T) -> Self {
        Self::Opaque(Arc::new(value))
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => f.debug_tuple("String").field(s).finish(),
            Self::Int64(i) => f.debug_tuple("Int64").field(i).finish(),
            Self::Bool(b) => f.debug_tuple("Bool").field(b).finish(),
            Self::Opaque(_) => f.write_str("Opaque(..)"),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Int64(a), Self::Int64(b)) => a == b,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Opaque(a), Self::Opaque(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self { Self::String(s.to_owned()) }
}

impl From<String> for Value {
    fn from(s: String) -> Self { Self::String(s) }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self { Self::Int64(i) }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self { Self::Bool(b) }
}

/// Immutable-after-attach key/value bag. Clones share storage until one of
/// them is written to.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Metadata {
    entries: Arc<HashMap<String, Value>>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a map from key/value pairs. Later pairs win on duplicate keys.
    pub fn pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        let entries = pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        Self { entries: Arc::new(entries) }
    }

    /// Merges maps left to right; later maps override earlier ones on the same key.
    pub fn join<'a>(maps: impl IntoIterator<Item = &'a Metadata>) -> Self {
        let mut out = HashMap::new();
        for md in maps {
            for (k, v) in md.entries.iter() {
                out.insert(k.clone(), v.clone());
            }
        }
        Self { entries: Arc::new(out) }
    }

    /// A shallow copy with its own storage.
    pub fn copy(&self) -> Self {
        Self::join([self])
    }

    /// Inserts into this map. If the storage is shared with another clone,
    /// for example one already attached to a scope, it is copied first.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        Arc::make_mut(&mut self.entries).insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// String value, or `""` when absent or of another kind.
    pub fn string(&self, key: &str) -> &str {
        match self.get(key) {
            Some(Value::String(s)) => s.as_str(),
            _ => "",
        }
    }

    /// Integer value, or `0` when absent or of another kind.
    pub fn int64(&self, key: &str) -> i64 {
        match self.get(key) {
            Some(Value::Int64(i)) => *i,
            _ => 0,
        }
    }

    /// Boolean value. A string holding a boolean literal counts; anything
    /// else is `false`.
    pub fn bool(&self, key: &str) -> bool {
        match self.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => parse_bool(s).unwrap_or(false),
            _ => false,
        }
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Metadata {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::pairs(iter)
    }
}

/// Parses the boolean literals `1 t T TRUE true True` and `0 f F FALSE false False`.
pub fn parse_bool(s: &str) -> Option<bool> {
    match s {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}

// ── Scope integration ─────────────────────────────────────────────────────────

/// Returns a child of `parent` carrying `md`.
pub fn attach(parent: &Scope, md: Metadata) -> Scope {
    parent.with_metadata(md)
}

/// The metadata attached to `scope`, if any.
pub fn from_scope(scope: &Scope) -> Option<&Metadata> {
    scope.metadata()
}

/// Returns a fresh root scope, with no deadline and never cancelled, carrying a
/// copy of the metadata of `scope`. Without metadata, a plain background scope.
pub fn detach(scope: &Scope) -> Scope {
    match scope.metadata() {
        Some(md) => attach(&Scope::background(), md.copy()),
        None => Scope::background(),
    }
}

pub fn string(scope: &Scope, key: &str) -> String {
    scope.metadata().map(|md| md.string(key).to_owned()).unwrap_or_default()
}

pub fn int64(scope: &Scope, key: &str) -> i64 {
    scope.metadata().map_or(0, |md| md.int64(key))
}

pub fn bool(scope: &Scope, key: &str) -> bool {
    scope.metadata().is_some_and(|md| md.bool(key))
}

pub fn value(scope: &Scope, key: &str) -> Option<Value> {
    scope.metadata()?.get(key).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── Metadata ──────────────────────────────────────────────────────────────

    #[test]
    fn join_later_maps_win() {
        let a = Metadata::pairs([("a", 1i64)]);
        let b = Metadata::pairs([("a", 2i64), ("b", 3i64)]);

        let joined = Metadata::join([&a, &b]);

        assert_eq!(joined.len(), 2);
        assert_eq!(joined.int64("a"), 2);
        assert_eq!(joined.int64("b"), 3);
    }

    #[test]
    fn insert_on_clone_does_not_touch_original() {
        let original = Metadata::pairs([("caller", "svc-a")]);
        let mut clone = original.clone();

        clone.insert("caller", "svc-b");

        assert_eq!(original.string("caller"), "svc-a");
        assert_eq!(clone.string("caller"), "svc-b");
    }

    #[test]
    fn accessors_default_on_absence_or_kind_mismatch() {
        let md = Metadata::pairs([("n", Value::Int64(7)), ("s", Value::from("x"))]);

        assert_eq!(md.string("missing"), "");
        assert_eq!(md.string("n"), "");
        assert_eq!(md.int64("s"), 0);
        assert!(!md.bool("missing"));
    }

    #[test]
    fn bool_accepts_native_and_string_literals() {
        let md = Metadata::pairs([
            ("native", Value::Bool(true)),
            ("text", Value::from("true")),
            ("short", Value::from("T")),
            ("junk", Value::from("yes")),
            ("number", Value::Int64(1)),
        ]);

        assert!(md.bool("native"));
        assert!(md.bool("text"));
        assert!(md.bool("short"));
        assert!(!md.bool("junk"));
        assert!(!md.bool("number"));
    }

    #[test]
    fn opaque_values_round_trip_by_reference() {
        let md = Metadata::pairs([("span", Value::opaque(42u32))]);

        let Some(Value::Opaque(v)) = md.get("span") else {
            panic!("expected an opaque value");
        };
        assert_eq!(v.downcast_ref::<u32>(), Some(&42));
    }

    // ── Scope integration ─────────────────────────────────────────────────────

    #[test]
    fn attach_and_read_back() {
        let scope = attach(&Scope::background(), Metadata::pairs([("caller", "svc-a")]));

        assert_eq!(string(&scope, "caller"), "svc-a");
        assert_eq!(from_scope(&scope).map(Metadata::len), Some(1));
        assert!(from_scope(&Scope::background()).is_none());
        assert_eq!(string(&Scope::background(), "caller"), "");
        assert_eq!(value(&Scope::background(), "caller"), None);
    }

    #[test]
    fn child_scopes_inherit_metadata() {
        let scope = attach(&Scope::background(), Metadata::pairs([(keys::MIRROR, true)]));
        let (child, _guard) = scope.with_cancel();

        assert!(bool(&child, keys::MIRROR));
    }

    #[tokio::test]
    async fn detach_keeps_metadata_and_drops_deadline_and_cancellation() {
        let mut source = Metadata::pairs([("caller", "svcA")]);
        let base = attach(&Scope::background(), source.clone());
        let (request, guard) = base.with_timeout(std::time::Duration::from_millis(5));

        let background = detach(&request);
        source.insert("caller", "svcB");
        guard.cancel();

        assert!(request.is_done());
        assert!(!background.is_done());
        assert!(background.deadline().is_none());
        assert_eq!(string(&background, "caller"), "svcA");
    }

    #[test]
    fn detach_without_metadata_is_background() {
        let (scope, _guard) = Scope::background().with_cancel();
        let detached = detach(&scope);

        assert!(detached.metadata().is_none());
        assert!(detached.deadline().is_none());
    }
}
