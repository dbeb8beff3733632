// Command request/response types
//
// A device command is a hierarchical path (`/ip/pool/print`) plus an ordered
// list of words. Attribute words carry `key=value` arguments, query words
// (`?key=value`) filter `print` output. Responses are ordered string maps,
// each optionally carrying the device-assigned `.id`.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Key under which the device reports an object's opaque identifier.
pub const ID_KEY: &str = ".id";

/// Key under which `add` commands report the id of the created object.
pub const RET_KEY: &str = "ret";

// ── Word ────────────────────────────────────────────────────────────

/// One argument of a command.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Word {
    /// `=key=value` -- an attribute to set.
    Attribute { key: String, value: String },
    /// `?key=value` -- an equality filter for `print`.
    Query { key: String, value: String },
}

impl Word {
    pub fn key(&self) -> &str {
        match self {
            Self::Attribute { key, .. } | Self::Query { key, .. } => key,
        }
    }

    pub fn value(&self) -> &str {
        match self {
            Self::Attribute { value, .. } | Self::Query { value, .. } => value,
        }
    }

    pub fn is_query(&self) -> bool {
        matches!(self, Self::Query { .. })
    }
}

impl fmt::Display for Word {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Attribute { key, value } => write!(f, "={key}={value}"),
            Self::Query { key, value } => write!(f, "?{key}={value}"),
        }
    }
}

// ── Request ─────────────────────────────────────────────────────────

/// A single command addressed to the device.
///
/// Built fluently:
///
/// ```
/// use captive_api::Request;
///
/// let req = Request::new("/ip/pool/print").query("name", "hs-pool-1");
/// assert_eq!(req.to_string(), "/ip/pool/print ?name=hs-pool-1");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    path: String,
    words: Vec<Word>,
}

impl Request {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            words: Vec::new(),
        }
    }

    /// `print` on an object class, e.g. `Request::print("/ip/pool")`.
    pub fn print(class: &str) -> Self {
        Self::new(format!("{class}/print"))
    }

    /// `add` on an object class.
    pub fn add(class: &str) -> Self {
        Self::new(format!("{class}/add"))
    }

    /// `set` on one object of a class, addressed by id.
    pub fn set(class: &str, id: &str) -> Self {
        Self::new(format!("{class}/set")).attr(ID_KEY, id)
    }

    /// `remove` on one object of a class, addressed by id.
    pub fn remove(class: &str, id: &str) -> Self {
        Self::new(format!("{class}/remove")).attr(ID_KEY, id)
    }

    /// Append an attribute word.
    pub fn attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.words.push(Word::Attribute {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    /// Append a query word.
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.words.push(Word::Query {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn words(&self) -> &[Word] {
        &self.words
    }

    /// The object class this command targets (`/ip/pool` for `/ip/pool/add`).
    pub fn class(&self) -> &str {
        self.path
            .rsplit_once('/')
            .map_or(self.path.as_str(), |(class, _)| class)
    }

    /// The verb this command issues (`add` for `/ip/pool/add`).
    pub fn verb(&self) -> &str {
        self.path
            .rsplit_once('/')
            .map_or(self.path.as_str(), |(_, verb)| verb)
    }

    /// Value of the first attribute with the given key.
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.words
            .iter()
            .find(|w| !w.is_query() && w.key() == key)
            .map(Word::value)
    }

    /// Iterate attribute words as `(key, value)` pairs.
    pub fn attributes(&self) -> impl Iterator<Item = (&str, &str)> {
        self.words
            .iter()
            .filter(|w| !w.is_query())
            .map(|w| (w.key(), w.value()))
    }

    /// Iterate query words as `(key, value)` pairs.
    pub fn queries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.words
            .iter()
            .filter(|w| w.is_query())
            .map(|w| (w.key(), w.value()))
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)?;
        for word in &self.words {
            write!(f, " {word}")?;
        }
        Ok(())
    }
}

// ── Record ──────────────────────────────────────────────────────────

/// One attribute record returned by the device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(BTreeMap<String, String>);

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert, mostly useful in tests and simulators.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// The device-assigned object id (`.id`), or the `ret` of an `add`.
    pub fn id(&self) -> Option<&str> {
        self.get(ID_KEY).or_else(|| self.get(RET_KEY))
    }

    /// Interpret a RouterOS boolean (`true`/`yes`) attribute.
    pub fn flag(&self, key: &str) -> bool {
        matches!(self.get(key), Some("true" | "yes"))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, String)> for Record {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
