use std::cmp::Ordering;
use std::ops::{Bound, RangeBounds};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A valid record key. Keys are ordered the way IndexedDB orders them: numbers sort before
/// strings, strings before arrays. Integers and reals are compared numerically.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Key {
    Integer(i64),
    Real(f64),
    Text(String),
    Array(Vec<Key>),
}

impl Key {
    /// Converts a JSON value into a key. Returns `None` for values that are not valid keys
    /// (booleans, null, objects or arrays containing such values).
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(number) => {
                if let Some(int) = number.as_i64() {
                    return Some(Key::Integer(int));
                }
                number.as_f64().map(Key::Real)
            }
            Value::String(text) => Some(Key::Text(text.clone())),
            Value::Array(values) => values
                .iter()
                .map(Key::from_value)
                .collect::<Option<Vec<_>>>()
                .map(Key::Array),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Key::Integer(int) => Value::from(*int),
            Key::Real(real) => Value::from(*real),
            Key::Text(text) => Value::from(text.clone()),
            Key::Array(keys) => Value::Array(keys.iter().map(Key::to_value).collect()),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Key::Integer(int) => Some(*int as f64),
            Key::Real(real) => Some(*real),
            _ => None,
        }
    }

    fn type_rank(&self) -> u8 {
        match self {
            Key::Integer(_) | Key::Real(_) => 0,
            Key::Text(_) => 1,
            Key::Array(_) => 2,
        }
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Key::Integer(lhs), Key::Integer(rhs)) => lhs.cmp(rhs),
            (Key::Text(lhs), Key::Text(rhs)) => lhs.cmp(rhs),
            (Key::Array(lhs), Key::Array(rhs)) => lhs.cmp(rhs),
            (Key::Real(lhs), Key::Real(rhs)) => lhs.total_cmp(rhs),
            (Key::Integer(lhs), Key::Real(rhs)) => cmp_integer_real(*lhs, *rhs),
            (Key::Real(lhs), Key::Integer(rhs)) => cmp_integer_real(*rhs, *lhs).reverse(),
            (lhs, rhs) => lhs.type_rank().cmp(&rhs.type_rank()),
        }
    }
}

/// Compares without going through `f64`, which can't represent every `i64`.
fn cmp_integer_real(integer: i64, real: f64) -> Ordering {
    if real.is_nan() {
        return (integer as f64).total_cmp(&real);
    }
    // 2^63, the first float past i64::MAX.
    if real >= 9_223_372_036_854_775_808.0 {
        return Ordering::Less;
    }
    if real < -9_223_372_036_854_775_808.0 {
        return Ordering::Greater;
    }

    let truncated = real.trunc();
    match integer.cmp(&(truncated as i64)) {
        Ordering::Equal if real > truncated => Ordering::Less,
        Ordering::Equal if real < truncated => Ordering::Greater,
        ordering => ordering,
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

macro_rules! key_from_int(
    ($t:ty) => (
        impl From<$t> for Key {
            #[inline]
            fn from(value: $t) -> Self {
                Key::Integer(value.into())
            }
        }
    )
);

key_from_int!(i32);
key_from_int!(i64);
key_from_int!(u32);

impl From<f64> for Key {
    fn from(value: f64) -> Self {
        Key::Real(value)
    }
}

impl From<String> for Key {
    fn from(value: String) -> Self {
        Key::Text(value)
    }
}

impl From<&String> for Key {
    fn from(value: &String) -> Self {
        Key::Text(value.to_owned())
    }
}

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Key::Text(value.to_string())
    }
}

impl From<Vec<Key>> for Key {
    fn from(value: Vec<Key>) -> Self {
        Key::Array(value)
    }
}

/// Where a key lives inside a record. A single path may be dotted (`"address.city"`); an empty
/// path refers to the record itself. A sequence of paths produces an array key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyPath {
    Single(String),
    Sequence(Vec<String>),
}

impl KeyPath {
    pub fn paths(&self) -> Vec<&str> {
        match self {
            KeyPath::Single(path) => vec![path.as_str()],
            KeyPath::Sequence(paths) => paths.iter().map(String::as_str).collect(),
        }
    }

    /// Evaluates the key path against `value`.
    pub fn evaluate(&self, value: &Value) -> Option<Key> {
        match self {
            KeyPath::Single(path) => lookup(value, path).and_then(Key::from_value),
            KeyPath::Sequence(paths) => paths
                .iter()
                .map(|path| lookup(value, path).and_then(Key::from_value))
                .collect::<Option<Vec<_>>>()
                .map(Key::Array),
        }
    }

    /// Evaluates the key path for a multi-entry index, where an array value yields one key per
    /// (valid, distinct) element.
    pub fn evaluate_multi_entry(&self, value: &Value) -> Vec<Key> {
        let KeyPath::Single(path) = self else {
            return self.evaluate(value).into_iter().collect();
        };

        match lookup(value, path) {
            Some(Value::Array(elements)) => {
                let mut keys = elements
                    .iter()
                    .filter_map(Key::from_value)
                    .collect::<Vec<_>>();
                keys.sort();
                keys.dedup();
                keys
            }
            Some(element) => Key::from_value(element).into_iter().collect(),
            None => vec![],
        }
    }

    /// Writes `key` into `value` at this key path, creating intermediate objects as needed.
    /// Returns `false` if the key could not be injected.
    pub fn inject(&self, value: &mut Value, key: &Key) -> bool {
        let KeyPath::Single(path) = self else {
            return false;
        };
        if path.is_empty() {
            return false;
        }

        let mut current = value;
        let mut segments = path.split('.').peekable();

        while let Some(segment) = segments.next() {
            let Value::Object(map) = current else {
                return false;
            };

            if segments.peek().is_none() {
                map.insert(segment.to_string(), key.to_value());
                return true;
            }

            current = map
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Default::default()));
        }

        false
    }
}

fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(value);
    }
    path.split('.')
        .try_fold(value, |current, segment| current.get(segment))
}

impl From<&str> for KeyPath {
    fn from(value: &str) -> Self {
        KeyPath::Single(value.to_string())
    }
}

impl From<String> for KeyPath {
    fn from(value: String) -> Self {
        KeyPath::Single(value)
    }
}

impl From<Vec<&str>> for KeyPath {
    fn from(value: Vec<&str>) -> Self {
        KeyPath::Sequence(value.into_iter().map(ToString::to_string).collect())
    }
}

impl From<Vec<String>> for KeyPath {
    fn from(value: Vec<String>) -> Self {
        KeyPath::Sequence(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueryDirection {
    #[default]
    Forward,
    Backward,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum KeyRange {
    #[default]
    All,
    Only(Key),
    Range { start: Bound<Key>, end: Bound<Key> },
}

impl KeyRange {
    pub fn only(key: impl Into<Key>) -> Self {
        Self::Only(key.into())
    }

    pub fn from_range<K: Into<Key> + Clone, B: RangeBounds<K>>(range: B) -> Self {
        Self::Range {
            start: into_key_bound(range.start_bound()),
            end: into_key_bound(range.end_bound()),
        }
    }

    pub fn contains(&self, key: &Key) -> bool {
        match self {
            KeyRange::All => true,
            KeyRange::Only(only) => only == key,
            KeyRange::Range { start, end } => {
                let above_start = match start {
                    Bound::Included(start) => key >= start,
                    Bound::Excluded(start) => key > start,
                    Bound::Unbounded => true,
                };
                let below_end = match end {
                    Bound::Included(end) => key <= end,
                    Bound::Excluded(end) => key < end,
                    Bound::Unbounded => true,
                };
                above_start && below_end
            }
        }
    }
}

fn into_key_bound<K: Into<Key> + Clone>(bound: Bound<&K>) -> Bound<Key> {
    match bound {
        Bound::Included(key) => Bound::Included(key.clone().into()),
        Bound::Excluded(key) => Bound::Excluded(key.clone().into()),
        Bound::Unbounded => Bound::Unbounded,
    }
}

impl From<Key> for KeyRange {
    fn from(value: Key) -> Self {
        KeyRange::Only(value)
    }
}

impl From<&Key> for KeyRange {
    fn from(value: &Key) -> Self {
        KeyRange::Only(value.clone())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn test_key_ordering() {
        let mut keys = vec![
            Key::from(vec![Key::from(1)]),
            Key::from("b"),
            Key::from(2.5),
            Key::from("a"),
            Key::from(3),
            Key::from(-1),
        ];
        keys.sort();

        assert_eq!(
            keys,
            vec![
                Key::from(-1),
                Key::from(2.5),
                Key::from(3),
                Key::from("a"),
                Key::from("b"),
                Key::from(vec![Key::from(1)]),
            ]
        );
        assert_eq!(Key::Integer(2), Key::Real(2.0));
    }

    #[test]
    fn test_mixed_numeric_keys_compare_exactly() {
        let boundary = 1_i64 << 53;

        assert_eq!(Key::Integer(boundary), Key::Real(boundary as f64));
        assert!(Key::Real(boundary as f64) < Key::Integer(boundary + 1));
        assert!(Key::Integer(boundary) < Key::Integer(boundary + 1));
        assert!(Key::Integer(boundary + 1) > Key::Real(boundary as f64));

        assert!(Key::Integer(i64::MAX) < Key::Real(1e19));
        assert!(Key::Integer(i64::MIN) > Key::Real(-1e19));
        assert!(Key::Integer(i64::MIN) == Key::Real(-9_223_372_036_854_775_808.0));
        assert!(Key::Integer(5) < Key::Real(5.5));
        assert!(Key::Real(5.5) < Key::Integer(6));
        assert!(Key::Integer(-5) > Key::Real(-5.5));
        assert!(Key::Integer(-6) < Key::Real(-5.5));
    }

    #[test]
    fn test_key_from_value() {
        assert_eq!(Key::from_value(&json!(12)), Some(Key::Integer(12)));
        assert_eq!(Key::from_value(&json!("x")), Some(Key::from("x")));
        assert_eq!(
            Key::from_value(&json!([1, "a"])),
            Some(Key::from(vec![Key::from(1), Key::from("a")]))
        );
        assert_eq!(Key::from_value(&json!(true)), None);
        assert_eq!(Key::from_value(&json!({ "a": 1 })), None);
        assert_eq!(Key::from_value(&json!([1, null])), None);
    }

    #[test]
    fn test_evaluate_key_path() {
        let value = json!({ "id": 7, "address": { "city": "Lyon" }, "tags": ["b", "a", "b"] });

        assert_eq!(KeyPath::from("id").evaluate(&value), Some(Key::from(7)));
        assert_eq!(
            KeyPath::from("address.city").evaluate(&value),
            Some(Key::from("Lyon"))
        );
        assert_eq!(KeyPath::from("missing").evaluate(&value), None);
        assert_eq!(
            KeyPath::from(vec!["id", "address.city"]).evaluate(&value),
            Some(Key::from(vec![Key::from(7), Key::from("Lyon")]))
        );
        assert_eq!(
            KeyPath::from("tags").evaluate_multi_entry(&value),
            vec![Key::from("a"), Key::from("b")]
        );
    }

    #[test]
    fn test_inject_key() {
        let mut value = json!({ "name": "Jane" });
        assert!(KeyPath::from("meta.id").inject(&mut value, &Key::from(4)));
        assert_eq!(value, json!({ "name": "Jane", "meta": { "id": 4 } }));

        let mut scalar = json!(5);
        assert!(!KeyPath::from("id").inject(&mut scalar, &Key::from(1)));
    }

    #[test]
    fn test_key_range_contains() {
        let range = KeyRange::from_range(Key::from(2)..Key::from(5));
        assert!(!range.contains(&Key::from(1)));
        assert!(range.contains(&Key::from(2)));
        assert!(range.contains(&Key::from(4)));
        assert!(!range.contains(&Key::from(5)));

        let range = KeyRange::from_range(3..=3);
        assert!(range.contains(&Key::from(3)));

        assert!(KeyRange::All.contains(&Key::from("anything")));
        assert!(KeyRange::only(1).contains(&Key::Real(1.0)));
    }
}
