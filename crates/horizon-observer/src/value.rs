//! Values accepted and reported by observers.

use serde_json::Value as JsonValue;

use crate::observer::Observer;

/// A value stored in, or reported by, an [`Observer`].
///
/// Plain data travels as JSON. Nested observers keep their identity: setting
/// a field to `Value::Observer` stores that observer itself, and raw reads
/// hand it back instead of a snapshot.
#[derive(Clone, Debug)]
pub enum Value {
    /// Plain JSON data.
    Json(JsonValue),
    /// A live nested observer.
    Observer(Observer),
    /// An array whose elements may themselves be observers.
    Array(Vec<Value>),
}

impl Value {
    /// Deep-materialize into plain JSON.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Self::Json(value) => value.clone(),
            Self::Observer(observer) => observer.json(),
            Self::Array(items) => JsonValue::Array(items.iter().map(Value::to_json).collect()),
        }
    }

    /// The nested observer, if this value is one.
    pub fn as_observer(&self) -> Option<&Observer> {
        match self {
            Self::Observer(observer) => Some(observer),
            _ => None,
        }
    }

    /// The plain JSON, if this value is plain data.
    pub fn as_json(&self) -> Option<&JsonValue> {
        match self {
            Self::Json(value) => Some(value),
            _ => None,
        }
    }

    /// Whether this value is an array, plain or mixed.
    pub fn is_array(&self) -> bool {
        matches!(self, Self::Array(_) | Self::Json(JsonValue::Array(_)))
    }

    /// Whether this value is a plain JSON object.
    pub fn is_object(&self) -> bool {
        matches!(self, Self::Json(JsonValue::Object(_)))
    }

    /// The elements of an array value.
    pub(crate) fn array_items(&self) -> Option<Vec<Value>> {
        match self {
            Self::Array(items) => Some(items.clone()),
            Self::Json(JsonValue::Array(items)) => {
                Some(items.iter().cloned().map(Value::Json).collect())
            }
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Observer(a), Self::Observer(b)) => a.ptr_eq(b),
            (Self::Observer(_), _) | (_, Self::Observer(_)) => false,
            (Self::Json(a), Self::Json(b)) => a == b,
            _ => match (self.array_items(), other.array_items()) {
                (Some(a), Some(b)) => array_equals(&a, &b),
                _ => false,
            },
        }
    }
}

/// Element-wise array equality.
///
/// Observers compare by identity, everything else by value.
pub fn array_equals(a: &[Value], b: &[Value]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x == y)
}

impl From<JsonValue> for Value {
    fn from(value: JsonValue) -> Self {
        Self::Json(value)
    }
}

impl From<Observer> for Value {
    fn from(observer: Observer) -> Self {
        Self::Observer(observer)
    }
}

impl From<&Observer> for Value {
    fn from(observer: &Observer) -> Self {
        Self::Observer(observer.clone())
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Self::Array(items)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Json(JsonValue::Bool(v))
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Json(JsonValue::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Json(JsonValue::from(v))
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Self::Json(JsonValue::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Json(JsonValue::from(v))
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Json(JsonValue::String(v.to_string()))
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Json(JsonValue::String(v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_equality() {
        assert_eq!(Value::from(json!({"a": [1, 2]})), Value::from(json!({"a": [1, 2]})));
        assert_ne!(Value::from(1), Value::from("1"));
    }

    #[test]
    fn test_mixed_array_equality() {
        let plain = Value::from(json!([1, "two"]));
        let mixed = Value::Array(vec![Value::from(1), Value::from("two")]);
        assert_eq!(plain, mixed);
        assert!(plain.is_array());
    }

    #[test]
    fn test_observers_compare_by_identity() {
        let a = Observer::new();
        let b = Observer::new();
        assert_eq!(Value::from(&a), Value::from(&a));
        assert_ne!(Value::from(&a), Value::from(&b));
        assert_ne!(Value::from(&a), Value::from(json!({})));
    }

    #[test]
    fn test_array_equals() {
        let a = vec![Value::from(1), Value::from(2)];
        let b = vec![Value::from(1), Value::from(2)];
        let c = vec![Value::from(1)];
        assert!(array_equals(&a, &b));
        assert!(!array_equals(&a, &c));
    }

    #[test]
    fn test_to_json_materializes_observers() {
        let observer = Observer::from_json(json!({"x": 1})).unwrap();
        let value = Value::Array(vec![Value::from(&observer), Value::from(2)]);
        assert_eq!(value.to_json(), json!([{"x": 1}, 2]));
    }
}
