//! Log arguments and their conversion into JSON-safe values.
//!
//! A log call takes a list of [`Arg`]s. Each argument is sanitized into a
//! `serde_json::Value` for the record's `data` payload and rendered into a
//! display string for the record's `message`. Sanitization never fails: a
//! value that cannot be represented degrades to a string placeholder.

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Placeholder for a back-edge in a cyclic [`SharedValue`].
pub const CIRCULAR: &str = "[Circular]";

/// Placeholder for anything nested deeper than [`MAX_DEPTH`].
pub const MAX_DEPTH_MARKER: &str = "[MaxDepth]";

/// Nesting depth after which sanitization stops descending.
pub const MAX_DEPTH: usize = 64;

/// One argument of a leveled log call.
#[derive(Clone)]
pub enum Arg {
    /// Plain text. A leading text argument is the primary message.
    Text(String),
    /// An already structured value.
    Json(Value),
    /// An error together with its `source()` chain.
    Error(ErrorArg),
    /// A shared, possibly cyclic, value graph.
    Shared(SharedValue),
}

impl Arg {
    /// Capture an error and its source chain.
    pub fn error<E>(err: &E) -> Self
    where
        E: std::error::Error + ?Sized,
    {
        Arg::Error(ErrorArg::new(err))
    }

    /// Convert any serializable value. Serialization failures become a
    /// `"[Unserializable: ...]"` placeholder instead of an error.
    pub fn serialize<T: Serialize + ?Sized>(value: &T) -> Self {
        match serde_json::to_value(value) {
            Ok(Value::String(s)) => Arg::Text(s),
            Ok(v) => Arg::Json(v),
            Err(e) => Arg::Json(Value::String(format!("[Unserializable: {e}]"))),
        }
    }

    /// Render a value through its `Debug` implementation.
    pub fn debug<T: fmt::Debug + ?Sized>(value: &T) -> Self {
        Arg::Json(Value::String(format!("{value:?}")))
    }

    pub fn is_text(&self) -> bool {
        matches!(self, Arg::Text(_))
    }

    /// JSON-safe, cycle-free representation of this argument.
    pub fn sanitize(&self) -> Value {
        match self {
            Arg::Text(s) => Value::String(s.clone()),
            Arg::Json(v) => bound_depth(v, 0),
            Arg::Error(e) => e.to_value(),
            Arg::Shared(s) => s.sanitize(),
        }
    }

    /// Display form used when composing the record message.
    pub fn render(&self) -> String {
        match self {
            Arg::Text(s) | Arg::Json(Value::String(s)) => s.clone(),
            Arg::Error(e) => e.to_string(),
            other => serde_json::to_string(&other.sanitize())
                .unwrap_or_else(|e| format!("[Unserializable: {e}]")),
        }
    }
}

impl fmt::Debug for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arg::Text(s) => f.debug_tuple("Text").field(s).finish(),
            Arg::Json(v) => f.debug_tuple("Json").field(v).finish(),
            Arg::Error(e) => f.debug_tuple("Error").field(e).finish(),
            Arg::Shared(s) => f.debug_tuple("Shared").field(&s.sanitize()).finish(),
        }
    }
}

impl From<&str> for Arg {
    fn from(s: &str) -> Self {
        Arg::Text(s.to_string())
    }
}

impl From<String> for Arg {
    fn from(s: String) -> Self {
        Arg::Text(s)
    }
}

impl From<Value> for Arg {
    fn from(v: Value) -> Self {
        match v {
            Value::String(s) => Arg::Text(s),
            other => Arg::Json(other),
        }
    }
}

impl From<SharedValue> for Arg {
    fn from(v: SharedValue) -> Self {
        Arg::Shared(v)
    }
}

impl From<ErrorArg> for Arg {
    fn from(e: ErrorArg) -> Self {
        Arg::Error(e)
    }
}

macro_rules! json_scalar_arg {
    ($($ty:ty),*) => {
        $(impl From<$ty> for Arg {
            fn from(v: $ty) -> Self {
                Arg::Json(Value::from(v))
            }
        })*
    };
}

json_scalar_arg!(bool, i32, i64, u32, u64, usize, f64);

/// Build a `Vec<Arg>` from heterogeneous expressions.
///
/// ```
/// use ws_log_sink::args;
/// let args = args!["user logged in", serde_json::json!({"id": 7})];
/// assert_eq!(args.len(), 2);
/// ```
#[macro_export]
macro_rules! args {
    () => {
        ::std::vec::Vec::<$crate::value::Arg>::new()
    };
    ($($arg:expr),+ $(,)?) => {
        ::std::vec![$($crate::value::Arg::from($arg)),+]
    };
}

/// Snapshot of an error: its own message plus every `source()` below it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorArg {
    pub message: String,
    pub causes: Vec<String>,
}

impl ErrorArg {
    pub fn new<E>(err: &E) -> Self
    where
        E: std::error::Error + ?Sized,
    {
        let mut causes = Vec::new();
        let mut next = err.source();
        while let Some(cause) = next {
            causes.push(cause.to_string());
            next = cause.source();
        }
        ErrorArg {
            message: err.to_string(),
            causes,
        }
    }

    fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("message".into(), Value::String(self.message.clone()));
        if !self.causes.is_empty() {
            map.insert(
                "causes".into(),
                Value::Array(self.causes.iter().cloned().map(Value::String).collect()),
            );
        }
        Value::Object(map)
    }
}

impl fmt::Display for ErrorArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)?;
        for cause in &self.causes {
            write!(f, "\n    caused by: {cause}")?;
        }
        Ok(())
    }
}

enum Node {
    Scalar(Value),
    List(Mutex<Vec<SharedValue>>),
    Object(Mutex<Vec<(String, SharedValue)>>),
}

/// Reference-counted value graph whose containers can point back at their
/// ancestors. Identity is the allocation, so cloning a handle shares it.
#[derive(Clone)]
pub struct SharedValue(Arc<Node>);

impl SharedValue {
    pub fn scalar(v: impl Into<Value>) -> Self {
        SharedValue(Arc::new(Node::Scalar(v.into())))
    }

    pub fn list() -> Self {
        SharedValue(Arc::new(Node::List(Mutex::new(Vec::new()))))
    }

    pub fn object() -> Self {
        SharedValue(Arc::new(Node::Object(Mutex::new(Vec::new()))))
    }

    /// Append to a list. Returns `false` if this value is not a list.
    pub fn push(&self, item: SharedValue) -> bool {
        match &*self.0 {
            Node::List(items) => {
                items.lock().push(item);
                true
            }
            _ => false,
        }
    }

    /// Set a key on an object, replacing any previous entry. Returns
    /// `false` if this value is not an object.
    pub fn insert(&self, key: impl Into<String>, item: SharedValue) -> bool {
        let Node::Object(entries) = &*self.0 else {
            return false;
        };
        let key = key.into();
        let mut entries = entries.lock();
        match entries.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = item,
            None => entries.push((key, item)),
        }
        true
    }

    pub fn sanitize(&self) -> Value {
        let mut path = HashSet::new();
        self.sanitize_in(&mut path, 0)
    }

    // `path` holds the nodes currently being expanded, so a node reachable
    // twice without a cycle is rendered both times.
    fn sanitize_in(&self, path: &mut HashSet<*const Node>, depth: usize) -> Value {
        if let Node::Scalar(v) = &*self.0 {
            return bound_depth(v, depth);
        }
        let id = Arc::as_ptr(&self.0);
        if path.contains(&id) {
            return Value::String(CIRCULAR.into());
        }
        if depth >= MAX_DEPTH {
            return Value::String(MAX_DEPTH_MARKER.into());
        }
        path.insert(id);
        let out = match &*self.0 {
            Node::List(items) => {
                let items = items.lock().clone();
                Value::Array(
                    items
                        .iter()
                        .map(|item| item.sanitize_in(path, depth + 1))
                        .collect(),
                )
            }
            Node::Object(entries) => {
                let entries = entries.lock().clone();
                Value::Object(
                    entries
                        .iter()
                        .map(|(k, item)| (k.clone(), item.sanitize_in(path, depth + 1)))
                        .collect(),
                )
            }
            Node::Scalar(_) => unreachable!("scalars return early"),
        };
        path.remove(&id);
        out
    }
}

fn bound_depth(value: &Value, depth: usize) -> Value {
    match value {
        Value::Array(_) | Value::Object(_) if depth >= MAX_DEPTH => {
            Value::String(MAX_DEPTH_MARKER.into())
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| bound_depth(item, depth + 1))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), bound_depth(v, depth + 1)))
                .collect(),
        ),
        scalar => scalar.clone(),
    }
}

/// Join the rendered arguments with single spaces.
pub fn format_message(args: &[Arg]) -> String {
    args.iter().map(Arg::render).collect::<Vec<_>>().join(" ")
}

/// Sanitize every argument of a log call and pick the `data` payload.
///
/// A single non-text argument is its own payload. Otherwise the first
/// argument is taken to be the message and everything after it becomes the
/// payload. An empty payload is `None`.
pub fn data_payload(args: &[Arg]) -> Option<Vec<Value>> {
    let data: Vec<Value> = match args {
        [only] if !only.is_text() => vec![only.sanitize()],
        [_, rest @ ..] => rest.iter().map(Arg::sanitize).collect(),
        [] => Vec::new(),
    };
    (!data.is_empty()).then_some(data)
}
