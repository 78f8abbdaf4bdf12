//! Owned, comparable property values.
//!
//! `zvariant::Value` is neither `Clone` nor cheap to compare across
//! lifetimes, so cached properties are converted into [`PropertyValue`]
//! once when they arrive off the bus.

use std::collections::{BTreeMap, HashMap};
use zvariant::{ObjectPath, OwnedValue, Value};

/// A property value as cached by a [`PropertyWatcher`](crate::PropertyWatcher).
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Bool(bool),
    Byte(u8),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Double(f64),
    Str(String),
    ObjectPath(String),
    Bytes(Vec<u8>),
    StrList(Vec<String>),
    PathList(Vec<String>),
    List(Vec<PropertyValue>),
    /// String-keyed dictionary, e.g. oFono's `Retries`.
    Dict(BTreeMap<String, PropertyValue>),
    /// Structures, file descriptors and non-string-keyed dictionaries are
    /// not modelled.
    /// Carries the D-Bus signature of the value that was skipped.
    Unsupported(String),
}

impl PropertyValue {
    fn from_items(items: Vec<PropertyValue>) -> Self {
        if items.is_empty() {
            return Self::List(items);
        }
        if items.iter().all(|v| matches!(v, Self::Byte(_))) {
            return Self::Bytes(
                items
                    .into_iter()
                    .filter_map(|v| match v {
                        Self::Byte(b) => Some(b),
                        _ => None,
                    })
                    .collect(),
            );
        }
        if items.iter().all(|v| matches!(v, Self::Str(_))) {
            return Self::StrList(
                items
                    .into_iter()
                    .filter_map(|v| match v {
                        Self::Str(s) => Some(s),
                        _ => None,
                    })
                    .collect(),
            );
        }
        if items.iter().all(|v| matches!(v, Self::ObjectPath(_))) {
            return Self::PathList(
                items
                    .into_iter()
                    .filter_map(|v| match v {
                        Self::ObjectPath(p) => Some(p),
                        _ => None,
                    })
                    .collect(),
            );
        }
        Self::List(items)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Self::Byte(v) => Some(u32::from(*v)),
            Self::UInt16(v) => Some(u32::from(*v)),
            Self::UInt32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Self::Int16(v) => Some(i32::from(*v)),
            Self::Int32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_u8(&self) -> Option<u8> {
        match self {
            Self::Byte(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int16(v) => Some(i64::from(*v)),
            Self::Int32(v) => Some(i64::from(*v)),
            Self::Int64(v) => Some(*v),
            Self::UInt32(v) => Some(i64::from(*v)),
            _ => None,
        }
    }

    /// Strings and object paths both read as text.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) | Self::ObjectPath(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(b) => Some(b),
            Self::List(items) if items.is_empty() => Some(&[]),
            _ => None,
        }
    }

    pub fn as_str_list(&self) -> Option<&[String]> {
        match self {
            Self::StrList(v) | Self::PathList(v) => Some(v),
            Self::List(items) if items.is_empty() => Some(&[]),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&BTreeMap<String, PropertyValue>> {
        match self {
            Self::Dict(d) => Some(d),
            _ => None,
        }
    }

    /// Converts back into a D-Bus value for writes.
    ///
    /// Returns `None` for values that are never written back.
    pub fn to_value(&self) -> Option<Value<'static>> {
        let value = match self {
            Self::Bool(b) => Value::from(*b),
            Self::Byte(v) => Value::from(*v),
            Self::Int16(v) => Value::from(*v),
            Self::UInt16(v) => Value::from(*v),
            Self::Int32(v) => Value::from(*v),
            Self::UInt32(v) => Value::from(*v),
            Self::Int64(v) => Value::from(*v),
            Self::UInt64(v) => Value::from(*v),
            Self::Double(v) => Value::from(*v),
            Self::Str(s) => Value::from(s.clone()),
            Self::ObjectPath(p) => Value::from(ObjectPath::try_from(p.clone()).ok()?),
            Self::Bytes(b) => Value::from(b.clone()),
            Self::StrList(v) => Value::from(v.clone()),
            Self::PathList(_) | Self::List(_) | Self::Dict(_) | Self::Unsupported(_) => {
                return None;
            }
        };
        Some(value)
    }
}

impl From<&Value<'_>> for PropertyValue {
    fn from(value: &Value<'_>) -> Self {
        match value {
            Value::Bool(b) => Self::Bool(*b),
            Value::U8(v) => Self::Byte(*v),
            Value::I16(v) => Self::Int16(*v),
            Value::U16(v) => Self::UInt16(*v),
            Value::I32(v) => Self::Int32(*v),
            Value::U32(v) => Self::UInt32(*v),
            Value::I64(v) => Self::Int64(*v),
            Value::U64(v) => Self::UInt64(*v),
            Value::F64(v) => Self::Double(*v),
            Value::Str(s) => Self::Str(s.as_str().to_owned()),
            Value::ObjectPath(p) => Self::ObjectPath(p.as_str().to_owned()),
            Value::Value(inner) => Self::from(inner.as_ref()),
            Value::Array(array) => Self::from_items(array.iter().map(Self::from).collect()),
            Value::Dict(dict) => dict
                .iter()
                .map(|(k, v)| match k {
                    Value::Str(k) => Some((k.as_str().to_owned(), Self::from(v))),
                    _ => None,
                })
                .collect::<Option<BTreeMap<_, _>>>()
                .map(Self::Dict)
                .unwrap_or_else(|| Self::Unsupported(value.value_signature().to_string())),
            other => Self::Unsupported(other.value_signature().to_string()),
        }
    }
}

impl From<&OwnedValue> for PropertyValue {
    fn from(value: &OwnedValue) -> Self {
        Self::from(&**value)
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_owned())
    }
}

/// Converts a `GetAll`/`GetProperties` reply into cached values.
pub(crate) fn property_map(raw: HashMap<String, OwnedValue>) -> HashMap<String, PropertyValue> {
    raw.iter()
        .map(|(name, value)| (name.clone(), PropertyValue::from(value)))
        .collect()
}

/// A NetworkManager connection settings map (`a{sa{sv}}`).
pub type SettingsMap = HashMap<String, HashMap<String, OwnedValue>>;

/// Converts anything `Value` can hold into an `OwnedValue`.
pub(crate) fn owned_value<'a>(value: impl Into<Value<'a>>) -> zvariant::Result<OwnedValue> {
    OwnedValue::try_from(value.into())
}

/// Writes one setting, creating the section if needed.
pub(crate) fn set_setting<'a>(
    settings: &mut SettingsMap,
    section: &str,
    key: &str,
    value: impl Into<Value<'a>>,
) -> zvariant::Result<()> {
    settings
        .entry(section.to_owned())
        .or_default()
        .insert(key.to_owned(), owned_value(value)?);
    Ok(())
}

/// Reads a string setting such as `connection.id`.
pub(crate) fn setting_str(settings: &SettingsMap, section: &str, key: &str) -> Option<String> {
    match &**settings.get(section)?.get(key)? {
        Value::Str(s) => Some(s.as_str().to_owned()),
        _ => None,
    }
}

/// Reads a boolean setting such as `ipv4.never-default`.
pub(crate) fn setting_bool(settings: &SettingsMap, section: &str, key: &str) -> Option<bool> {
    match &**settings.get(section)?.get(key)? {
        Value::Bool(b) => Some(*b),
        _ => None,
    }
}

/// Reads a string dictionary setting such as `vpn.data` (`a{ss}`).
pub(crate) fn setting_string_map(
    settings: &SettingsMap,
    section: &str,
    key: &str,
) -> HashMap<String, String> {
    let Some(value) = settings.get(section).and_then(|s| s.get(key)) else {
        return HashMap::new();
    };
    match value
        .try_clone()
        .and_then(HashMap::<String, String>::try_from)
    {
        Ok(map) => map,
        Err(e) => {
            log::warn!("Ignoring malformed {section}.{key}: {e}");
            HashMap::new()
        }
    }
}
