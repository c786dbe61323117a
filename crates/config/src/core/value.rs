//! Concurrency-safe configuration value cells

use super::{ConfigError, ConfigResult};
use arc_swap::ArcSwap;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Shape of a decoded value, used for change detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// JSON null
    Null,
    /// Boolean
    Bool,
    /// Integer or floating point number
    Number,
    /// String
    String,
    /// Ordered list
    Array,
    /// Nested map
    Object,
}

impl ValueKind {
    /// Kind of a tree node
    pub fn of(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(_) => Self::Bool,
            serde_json::Value::Number(_) => Self::Number,
            serde_json::Value::String(_) => Self::String,
            serde_json::Value::Array(_) => Self::Array,
            serde_json::Value::Object(_) => Self::Object,
        }
    }

    /// Human-readable name
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool => "boolean",
            Self::Number => "number",
            Self::String => "string",
            Self::Array => "array",
            Self::Object => "object",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

enum Slot {
    Present(ArcSwap<serde_json::Value>),
    Missing(ConfigError),
}

/// A shared cell holding the current value of one configuration key.
///
/// Clones share the cell: a store through any clone is visible to all of
/// them. A missing value fails every read with the error it carries and
/// ignores stores.
#[derive(Clone)]
pub struct Value {
    key: Arc<str>,
    slot: Arc<Slot>,
}

impl Value {
    /// Create a cell holding `payload` for `key`
    pub fn new(key: impl Into<Arc<str>>, payload: serde_json::Value) -> Self {
        Self {
            key: key.into(),
            slot: Arc::new(Slot::Present(ArcSwap::from_pointee(payload))),
        }
    }

    /// Create a cell whose reads always fail with `error`
    pub fn missing(key: impl Into<Arc<str>>, error: ConfigError) -> Self {
        Self {
            key: key.into(),
            slot: Arc::new(Slot::Missing(error)),
        }
    }

    /// Key this value is accessed by
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Check if this is a missing value
    pub fn is_missing(&self) -> bool {
        matches!(*self.slot, Slot::Missing(_))
    }

    /// Check if two handles share the same cell
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.slot, &other.slot)
    }

    /// Current payload
    pub fn load(&self) -> ConfigResult<Arc<serde_json::Value>> {
        match &*self.slot {
            Slot::Present(cell) => Ok(cell.load_full()),
            Slot::Missing(err) => Err(err.clone()),
        }
    }

    /// Atomically replace the payload
    pub fn store(&self, payload: serde_json::Value) {
        if let Slot::Present(cell) = &*self.slot {
            cell.store(Arc::new(payload));
        }
    }

    /// Kind of the current payload
    pub fn kind(&self) -> ConfigResult<ValueKind> {
        self.load().map(|v| ValueKind::of(&v))
    }

    /// Current payload as a boolean; strings `true`/`false`/`1`/`0` are accepted
    pub fn bool(&self) -> ConfigResult<bool> {
        let payload = self.load()?;
        match &*payload {
            serde_json::Value::Bool(b) => Ok(*b),
            serde_json::Value::Number(n) if n.as_i64() == Some(1) => Ok(true),
            serde_json::Value::Number(n) if n.as_i64() == Some(0) => Ok(false),
            serde_json::Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" => Ok(true),
                "false" | "0" => Ok(false),
                _ => Err(self.mismatch("boolean", &payload)),
            },
            other => Err(self.mismatch("boolean", other)),
        }
    }

    /// Current payload as an integer; numeric strings are accepted
    pub fn int(&self) -> ConfigResult<i64> {
        let payload = self.load()?;
        match &*payload {
            serde_json::Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
                .ok_or_else(|| self.mismatch("integer", &payload)),
            serde_json::Value::String(s) => s
                .trim()
                .parse()
                .map_err(|_| self.mismatch("integer", &payload)),
            other => Err(self.mismatch("integer", other)),
        }
    }

    /// Current payload as a float; numeric strings are accepted
    pub fn float(&self) -> ConfigResult<f64> {
        let payload = self.load()?;
        match &*payload {
            serde_json::Value::Number(n) => {
                n.as_f64().ok_or_else(|| self.mismatch("float", &payload))
            }
            serde_json::Value::String(s) => s
                .trim()
                .parse()
                .map_err(|_| self.mismatch("float", &payload)),
            other => Err(self.mismatch("float", other)),
        }
    }

    /// Current payload as a string; scalars are stringified
    pub fn string(&self) -> ConfigResult<String> {
        let payload = self.load()?;
        match &*payload {
            serde_json::Value::String(s) => Ok(s.clone()),
            serde_json::Value::Bool(b) => Ok(b.to_string()),
            serde_json::Value::Number(n) => Ok(n.to_string()),
            other => Err(self.mismatch("string", other)),
        }
    }

    /// Current payload as a duration.
    ///
    /// Integers are milliseconds; strings use humantime syntax (`"1m 30s"`).
    pub fn duration(&self) -> ConfigResult<Duration> {
        let payload = self.load()?;
        match &*payload {
            serde_json::Value::Number(n) => n
                .as_u64()
                .map(Duration::from_millis)
                .ok_or_else(|| self.mismatch("duration", &payload)),
            serde_json::Value::String(s) => {
                humantime::parse_duration(s.trim()).map_err(|_| self.mismatch("duration", &payload))
            }
            other => Err(self.mismatch("duration", other)),
        }
    }

    /// Current payload as a list of detached values, keyed `key.N`
    pub fn slice(&self) -> ConfigResult<Vec<Self>> {
        let payload = self.load()?;
        match &*payload {
            serde_json::Value::Array(items) => Ok(items
                .iter()
                .enumerate()
                .map(|(i, item)| Self::new(format!("{}.{i}", self.key), item.clone()))
                .collect()),
            other => Err(self.mismatch("array", other)),
        }
    }

    /// Current payload as a map of detached values, keyed `key.field`
    pub fn map(&self) -> ConfigResult<HashMap<String, Self>> {
        let payload = self.load()?;
        match &*payload {
            serde_json::Value::Object(fields) => Ok(fields
                .iter()
                .map(|(name, item)| {
                    (
                        name.clone(),
                        Self::new(format!("{}.{name}", self.key), item.clone()),
                    )
                })
                .collect()),
            other => Err(self.mismatch("object", other)),
        }
    }

    /// Deserialize the current payload into `T`
    pub fn scan<T: DeserializeOwned>(&self) -> ConfigResult<T> {
        let payload = self.load()?;
        T::deserialize(&*payload).map_err(|e| {
            ConfigError::type_mismatch(
                self.key(),
                std::any::type_name::<T>(),
                format!("{} ({e})", ValueKind::of(&payload)),
            )
        })
    }

    fn mismatch(&self, expected: &str, actual: &serde_json::Value) -> ConfigError {
        ConfigError::type_mismatch(self.key(), expected, ValueKind::of(actual).as_str())
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Value");
        s.field("key", &self.key);
        match &*self.slot {
            Slot::Present(cell) => s.field("kind", &ValueKind::of(&cell.load())),
            Slot::Missing(err) => s.field("missing", err),
        };
        s.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_store_is_visible_through_clones() {
        let value = Value::new("db.port", json!(5432));
        let other = value.clone();

        other.store(json!(6543));

        assert!(value.ptr_eq(&other));
        assert_eq!(*value.load().unwrap(), json!(6543));
    }

    #[test]
    fn test_missing_fails_reads_and_ignores_stores() {
        let value = Value::missing("absent", ConfigError::not_found("absent"));
        value.store(json!(1));

        assert!(value.is_missing());
        assert_eq!(value.load().unwrap_err(), ConfigError::not_found("absent"));
        assert!(value.int().unwrap_err().is_not_found());
    }

    #[test]
    fn test_scalar_coercions() {
        assert!(Value::new("a", json!("true")).bool().unwrap());
        assert!(!Value::new("a", json!(0)).bool().unwrap());
        assert_eq!(Value::new("a", json!(" 42 ")).int().unwrap(), 42);
        assert_eq!(Value::new("a", json!(3.0)).int().unwrap(), 3);
        assert_eq!(Value::new("a", json!("2.5")).float().unwrap(), 2.5);
        assert_eq!(Value::new("a", json!(8080)).string().unwrap(), "8080");
    }

    #[test]
    fn test_type_mismatch_names_key_and_kinds() {
        let err = Value::new("db.host", json!({"a": 1})).int().unwrap_err();
        assert_eq!(err, ConfigError::type_mismatch("db.host", "integer", "object"));
    }

    #[test]
    fn test_duration() {
        assert_eq!(
            Value::new("t", json!(1500)).duration().unwrap(),
            Duration::from_millis(1500)
        );
        assert_eq!(
            Value::new("t", json!("1m 30s")).duration().unwrap(),
            Duration::from_secs(90)
        );
        assert!(Value::new("t", json!("soon")).duration().is_err());
    }

    #[test]
    fn test_slice_and_map_are_detached() {
        let value = Value::new("servers", json!([{"host": "a"}, {"host": "b"}]));
        let items = value.slice().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].key(), "servers.1");

        let fields = items[0].map().unwrap();
        assert_eq!(fields["host"].string().unwrap(), "a");
        assert_eq!(fields["host"].key(), "servers.0.host");

        items[0].store(json!(null));
        assert_eq!(value.slice().unwrap()[0].map().unwrap().len(), 1);
    }

    #[test]
    fn test_scan() {
        #[derive(serde::Deserialize, Debug, PartialEq)]
        struct Db {
            host: String,
            port: u16,
        }

        let value = Value::new("db", json!({"host": "a", "port": 5432}));
        assert_eq!(
            value.scan::<Db>().unwrap(),
            Db {
                host: "a".to_string(),
                port: 5432
            }
        );
        assert!(value.scan::<Vec<String>>().is_err());
    }

    #[test]
    fn test_value_kind() {
        assert_eq!(ValueKind::of(&json!(null)), ValueKind::Null);
        assert_eq!(ValueKind::of(&json!(1.5)), ValueKind::Number);
        assert_eq!(ValueKind::of(&json!([1])).to_string(), "array");
    }
}
