//! Keys, key paths and key ranges of the memory engine.

use std::cmp::Ordering;

use serde_json::Value;

use crate::error::NativeError;
use crate::native::NativeResult;
use crate::types::{KeyPath, KeyRange, Query};

/// A valid key. Numbers sort before strings, strings before arrays.
#[derive(Debug, Clone)]
pub(crate) enum Key {
    Number(f64),
    String(String),
    Array(Vec<Key>),
}

impl Key {
    /// `None` when `value` is not a valid key (objects, booleans, null, NaN).
    pub(crate) fn from_value(value: &Value) -> Option<Key> {
        match value {
            Value::Number(number) => {
                let number = number.as_f64()?;
                if number.is_nan() {
                    return None;
                }
                // -0 and 0 are the same key
                Some(Key::Number(if number == 0.0 { 0.0 } else { number }))
            }
            Value::String(string) => Some(Key::String(string.clone())),
            Value::Array(items) => items
                .iter()
                .map(Key::from_value)
                .collect::<Option<Vec<_>>>()
                .map(Key::Array),
            _ => None,
        }
    }

    pub(crate) fn parse(value: &Value) -> NativeResult<Key> {
        Key::from_value(value).ok_or_else(|| {
            NativeError::new("DataError", "The parameter is not a valid key.")
        })
    }

    pub(crate) fn to_value(&self) -> Value {
        match self {
            Key::Number(number) => {
                if number.fract() == 0.0 && number.abs() < 9_007_199_254_740_992.0 {
                    Value::from(*number as i64)
                } else {
                    serde_json::Number::from_f64(*number)
                        .map(Value::Number)
                        .unwrap_or(Value::Null)
                }
            }
            Key::String(string) => Value::String(string.clone()),
            Key::Array(items) => Value::Array(items.iter().map(Key::to_value).collect()),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Key::Number(_) => 0,
            Key::String(_) => 1,
            Key::Array(_) => 2,
        }
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Key::Number(a), Key::Number(b)) => a.total_cmp(b),
            (Key::String(a), Key::String(b)) => a.cmp(b),
            (Key::Array(a), Key::Array(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Key {}

/// Value found at a dotted path; the empty path is the value itself.
fn evaluate_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(value);
    }
    path.split('.')
        .try_fold(value, |current, segment| current.as_object()?.get(segment))
}

/// Key at `key_path` in `value`. `None` when a path is missing or does not
/// yield a valid key.
pub(crate) fn extract(value: &Value, key_path: &KeyPath) -> Option<Key> {
    match key_path {
        KeyPath::Single(path) => evaluate_path(value, path).and_then(Key::from_value),
        KeyPath::Compound(paths) => paths
            .iter()
            .map(|path| evaluate_path(value, path).and_then(Key::from_value))
            .collect::<Option<Vec<_>>>()
            .map(Key::Array),
    }
}

/// True when `value` holds something at `key_path`, valid key or not.
pub(crate) fn has_path(value: &Value, key_path: &KeyPath) -> bool {
    match key_path {
        KeyPath::Single(path) => evaluate_path(value, path).is_some(),
        KeyPath::Compound(paths) => paths.iter().all(|path| evaluate_path(value, path).is_some()),
    }
}

/// Index keys of `value`. Multi-entry indexes over an array yield one key
/// per distinct valid element.
pub(crate) fn index_keys(value: &Value, key_path: &KeyPath, multi_entry: bool) -> Vec<Key> {
    if let (true, KeyPath::Single(path)) = (multi_entry, key_path) {
        if let Some(Value::Array(items)) = evaluate_path(value, path) {
            let mut keys: Vec<Key> = items.iter().filter_map(Key::from_value).collect();
            keys.sort();
            keys.dedup();
            return keys;
        }
    }
    extract(value, key_path).into_iter().collect()
}

/// Whether a generated key can be written at `path`: every existing parent
/// on the way must be an object.
pub(crate) fn can_inject(value: &Value, path: &str) -> bool {
    let mut current = value;
    for segment in path.split('.') {
        let Some(object) = current.as_object() else {
            return false;
        };
        match object.get(segment) {
            Some(next) => current = next,
            None => return true,
        }
    }
    true
}

/// Write `key` at `path`, creating intermediate objects.
pub(crate) fn inject(value: &mut Value, path: &str, key: Value) -> bool {
    let mut segments: Vec<&str> = path.split('.').collect();
    let Some(last) = segments.pop() else {
        return false;
    };
    let mut current = value;
    for segment in segments {
        let Some(object) = current.as_object_mut() else {
            return false;
        };
        current = object
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Default::default()));
    }
    match current.as_object_mut() {
        Some(object) => {
            object.insert(last.to_string(), key);
            true
        }
        None => false,
    }
}

/// A query resolved to key bounds.
#[derive(Debug, Clone, Default)]
pub(crate) struct Bounds {
    lower: Option<Key>,
    upper: Option<Key>,
    lower_open: bool,
    upper_open: bool,
}

impl Bounds {
    /// Bounds matching everything.
    pub(crate) fn all() -> Self {
        Self::default()
    }

    pub(crate) fn from_query(query: Option<&Query<Value>>) -> NativeResult<Self> {
        match query {
            None => Ok(Self::all()),
            Some(Query::Key(value)) => {
                let key = Key::parse(value)?;
                Ok(Self {
                    lower: Some(key.clone()),
                    upper: Some(key),
                    lower_open: false,
                    upper_open: false,
                })
            }
            Some(Query::Range(range)) => Self::from_range(range),
        }
    }

    fn from_range(range: &KeyRange<Value>) -> NativeResult<Self> {
        let lower = range.lower.as_ref().map(Key::parse).transpose()?;
        let upper = range.upper.as_ref().map(Key::parse).transpose()?;
        if let (Some(lower), Some(upper)) = (&lower, &upper) {
            let empty = lower > upper || (lower == upper && (range.lower_open || range.upper_open));
            if empty {
                return Err(NativeError::new(
                    "DataError",
                    "The lower key is greater than the upper key.",
                ));
            }
        }
        Ok(Self {
            lower,
            upper,
            lower_open: range.lower_open,
            upper_open: range.upper_open,
        })
    }

    pub(crate) fn contains(&self, key: &Key) -> bool {
        let above_lower = match &self.lower {
            Some(lower) if self.lower_open => key > lower,
            Some(lower) => key >= lower,
            None => true,
        };
        let below_upper = match &self.upper {
            Some(upper) if self.upper_open => key < upper,
            Some(upper) => key <= upper,
            None => true,
        };
        above_lower && below_upper
    }
}
